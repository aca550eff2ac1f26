//! Immutable predicate expression trees.
//!
//! Nodes are built only through the combinators on [`PropertyRef`] and
//! [`Expr`]; that is the single place operand types are checked. Once built a
//! tree is shared behind an `Arc` and never changes.

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

use super::property::{Bounds, PropertyPath, PropertyRef};
use crate::model::{TypeFamily, Value};
use crate::{Error, Result};

/// Scalar comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

/// String matching operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextOp {
    BeginsWith,
    EndsWith,
    Contains,
}

impl TextOp {
    pub fn keyword(self) -> &'static str {
        match self {
            TextOp::BeginsWith => "BEGINSWITH",
            TextOp::EndsWith => "ENDSWITH",
            TextOp::Contains => "CONTAINS",
        }
    }
}

/// Case handling for string matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Case {
    #[default]
    Sensitive,
    Insensitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
        }
    }
}

/// Shape of one expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    /// `path <op> value`
    Comparison { op: CompareOp, path: PropertyPath, value: Value },
    /// `path BEGINSWITH|ENDSWITH|CONTAINS[c] value`
    Text { op: TextOp, path: PropertyPath, value: String, case: Case },
    /// Closed ranges lower to `BETWEEN`, half-open ranges to `>= && <`.
    Range { path: PropertyPath, lo: Value, hi: Value, inclusive: bool },
    /// `element IN path`
    Membership { path: PropertyPath, element: Value },
    /// Every element of the container lies within the bounds.
    AggregateRange { path: PropertyPath, lo: Value, hi: Value, inclusive: bool },
    Logical { op: LogicalOp, children: Vec<Expr> },
}

/// A type-checked, immutable predicate expression. Cheap to clone.
#[derive(Clone, PartialEq)]
pub struct Expr(Arc<ExprNode>);

impl Expr {
    fn new(node: ExprNode) -> Self {
        Self(Arc::new(node))
    }

    pub fn node(&self) -> &ExprNode {
        &self.0
    }

    /// Conjunction. Nested conjunctions are flattened.
    pub fn and(self, other: Expr) -> Expr {
        Self::combine(LogicalOp::And, [self, other])
    }

    /// Disjunction. Nested disjunctions are flattened.
    pub fn or(self, other: Expr) -> Expr {
        Self::combine(LogicalOp::Or, [self, other])
    }

    /// Conjunction of every expression; `None` if there are none.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        Self::fold(LogicalOp::And, exprs)
    }

    /// Disjunction of every expression; `None` if there are none.
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        Self::fold(LogicalOp::Or, exprs)
    }

    fn fold(op: LogicalOp, exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        let mut exprs = exprs.into_iter().collect::<Vec<_>>();
        match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Self::combine(op, exprs)),
        }
    }

    fn combine(op: LogicalOp, exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut children = Vec::new();
        for expr in exprs {
            match expr.node() {
                ExprNode::Logical { op: inner, children: nested } if *inner == op => {
                    children.extend(nested.iter().cloned());
                }
                _ => children.push(expr),
            }
        }
        Expr::new(ExprNode::Logical { op, children })
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl BitAnd for Expr {
    type Output = Expr;
    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl BitOr for Expr {
    type Output = Expr;
    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

// ============================================================================
// Combinators
// ============================================================================

impl PropertyRef {
    fn compare(&self, op: CompareOp, value: Value) -> Result<Expr> {
        self.require_scalar()?;
        match op {
            CompareOp::Eq | CompareOp::Neq => self.kind().check(&value)?,
            _ => {
                self.require_orderable()?;
                self.check_bound(&value)?;
            }
        }
        Ok(Expr::new(ExprNode::Comparison { op, path: self.path().clone(), value }))
    }

    pub fn equals(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Eq, value.into())
    }

    pub fn not_equals(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Neq, value.into())
    }

    pub fn less_than(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Lt, value.into())
    }

    pub fn less_or_equal(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Lte, value.into())
    }

    pub fn greater_than(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Gt, value.into())
    }

    pub fn greater_or_equal(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Gte, value.into())
    }

    /// `path == nil`; only legal on optional or any-typed properties.
    pub fn is_null(&self) -> Result<Expr> {
        self.equals(Value::Null)
    }

    /// `path != nil`; only legal on optional or any-typed properties.
    pub fn is_not_null(&self) -> Result<Expr> {
        self.not_equals(Value::Null)
    }

    /// Closed range `[lo, hi]`, compiled as `path BETWEEN {lo, hi}`.
    pub fn between(&self, lo: impl Into<Value>, hi: impl Into<Value>) -> Result<Expr> {
        self.contains_range(Bounds::closed(lo, hi))
    }

    /// Range containment of a scalar: `lo..hi` or `lo..=hi`.
    pub fn contains_range(&self, bounds: impl Into<Bounds>) -> Result<Expr> {
        let Bounds { lo, hi, inclusive } = bounds.into();
        self.require_scalar()?;
        self.require_orderable()?;
        self.check_bound(&lo)?;
        self.check_bound(&hi)?;
        check_same_family(&lo, &hi)?;
        Ok(Expr::new(ExprNode::Range { path: self.path().clone(), lo, hi, inclusive }))
    }

    fn text(&self, op: TextOp, value: &str, case: Case) -> Result<Expr> {
        self.require_scalar()?;
        if self.kind().family != TypeFamily::String {
            return Err(Error::TypeMismatch {
                expected: "string property".into(),
                got: format!("{}: {}", self.path(), self.kind()),
            });
        }
        Ok(Expr::new(ExprNode::Text { op, path: self.path().clone(), value: value.into(), case }))
    }

    pub fn begins_with(&self, prefix: &str, case: Case) -> Result<Expr> {
        self.text(TextOp::BeginsWith, prefix, case)
    }

    pub fn ends_with(&self, suffix: &str, case: Case) -> Result<Expr> {
        self.text(TextOp::EndsWith, suffix, case)
    }

    pub fn contains_text(&self, needle: &str, case: Case) -> Result<Expr> {
        self.text(TextOp::Contains, needle, case)
    }

    /// Element membership: `value IN path`. A null literal is accepted for
    /// any container and matches only a stored null element.
    pub fn contains_element(&self, element: impl Into<Value>) -> Result<Expr> {
        self.require_container()?;
        let element = element.into();
        if !element.is_null() {
            self.kind().element().check(&element)?;
        }
        Ok(Expr::new(ExprNode::Membership { path: self.path().clone(), element }))
    }

    /// Whole-container bound test: every element lies in `lo..hi` / `lo..=hi`.
    pub fn contains_all_within(&self, bounds: impl Into<Bounds>) -> Result<Expr> {
        let Bounds { lo, hi, inclusive } = bounds.into();
        self.require_container()?;
        if !self.kind().family.supports_min_max() {
            return Err(Error::UnsupportedAggregate {
                aggregate: "@min/@max",
                element: self.kind().element().to_string(),
            });
        }
        self.check_bound(&lo)?;
        self.check_bound(&hi)?;
        check_same_family(&lo, &hi)?;
        Ok(Expr::new(ExprNode::AggregateRange { path: self.path().clone(), lo, hi, inclusive }))
    }
}

fn check_same_family(lo: &Value, hi: &Value) -> Result<()> {
    if lo.family() == hi.family() {
        Ok(())
    } else {
        Err(Error::TypeMismatch { expected: lo.type_name().into(), got: hi.type_name().into() })
    }
}
