//! Query execution.
//!
//! Evaluates the expression tree retained in a [`CompiledPredicate`] against
//! one snapshot. The compiled text is an output format only; it is never
//! parsed back.
//!
//! [`CompiledPredicate`]: crate::query::CompiledPredicate

pub mod aggregate;
pub mod results;

use std::cmp::Ordering;

use crate::model::*;
use crate::query::{Case, CompareOp, Expr, ExprNode, LogicalOp, PropertyPath, TextOp};
use crate::storage::Snapshot;
use crate::{Error, Result};

pub use results::{ElementId, Results};
pub(crate) use results::{Binding, ResultsSpec, Source};

static NULL: Value = Value::Null;

/// What a property path reaches from one candidate.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Resolved<'a> {
    Scalar(&'a Value),
    Elements(&'a [StoredElement]),
}

impl<'a> Resolved<'a> {
    pub(crate) fn scalar(self) -> &'a Value {
        match self {
            Resolved::Scalar(v) => v,
            Resolved::Elements(_) => &NULL,
        }
    }
}

/// Follow `path` from `candidate`. Links are followed through the snapshot;
/// a null or dangling link reads as null. The empty path is the candidate.
pub(crate) fn resolve<'a>(snapshot: &'a Snapshot, candidate: &'a Value, path: &PropertyPath) -> Resolved<'a> {
    let mut current = candidate;
    for segment in path.segments() {
        let Some(entity) = current.as_object().and_then(|key| snapshot.entity(key)) else {
            return Resolved::Scalar(&NULL);
        };
        match entity.field(segment) {
            Some(Field::Value(v)) => current = v,
            Some(Field::List(elements) | Field::Set(elements)) => return Resolved::Elements(elements),
            None => return Resolved::Scalar(&NULL),
        }
    }
    Resolved::Scalar(current)
}

/// Whether `candidate` satisfies `expr` in `snapshot`.
pub fn evaluate(expr: &Expr, snapshot: &Snapshot, candidate: &Value) -> bool {
    match expr.node() {
        ExprNode::Comparison { op, path, value } => {
            compare(*op, resolve(snapshot, candidate, path).scalar(), value)
        }
        ExprNode::Text { op, path, value, case } => {
            let Some(text) = resolve(snapshot, candidate, path).scalar().as_str() else {
                return false;
            };
            match case {
                Case::Sensitive => match_text(*op, text, value),
                Case::Insensitive => match_text(*op, &text.to_lowercase(), &value.to_lowercase()),
            }
        }
        ExprNode::Range { path, lo, hi, inclusive } => {
            within(resolve(snapshot, candidate, path).scalar(), lo, hi, *inclusive)
        }
        ExprNode::Membership { path, element } => match resolve(snapshot, candidate, path) {
            Resolved::Elements(elements) => elements.iter().any(|e| e.value.exact_eq(element)),
            Resolved::Scalar(_) => false,
        },
        ExprNode::AggregateRange { path, lo, hi, inclusive } => match resolve(snapshot, candidate, path) {
            Resolved::Elements(elements) => {
                let values = elements.iter().map(|e| &e.value);
                match (aggregate::min(values.clone()), aggregate::max(values)) {
                    (Some(min), Some(max)) => {
                        at_least(&min, lo) && if *inclusive { at_most(&max, hi) } else { below(&max, hi) }
                    }
                    // @min/@max of nothing is null, which satisfies no bound
                    _ => false,
                }
            }
            Resolved::Scalar(_) => false,
        },
        ExprNode::Logical { op, children } => match op {
            LogicalOp::And => children.iter().all(|c| evaluate(c, snapshot, candidate)),
            LogicalOp::Or => children.iter().any(|c| evaluate(c, snapshot, candidate)),
        },
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        CompareOp::Eq => lhs.exact_eq(rhs),
        CompareOp::Neq => !lhs.exact_eq(rhs),
        CompareOp::Lt => below(lhs, rhs),
        CompareOp::Lte => at_most(lhs, rhs),
        CompareOp::Gt => matches!(lhs.compare_exact(rhs), Some(Ordering::Greater)),
        CompareOp::Gte => at_least(lhs, rhs),
    }
}

fn within(value: &Value, lo: &Value, hi: &Value, inclusive: bool) -> bool {
    at_least(value, lo) && if inclusive { at_most(value, hi) } else { below(value, hi) }
}

fn at_least(value: &Value, bound: &Value) -> bool {
    matches!(value.compare_exact(bound), Some(Ordering::Greater | Ordering::Equal))
}

fn at_most(value: &Value, bound: &Value) -> bool {
    matches!(value.compare_exact(bound), Some(Ordering::Less | Ordering::Equal))
}

fn below(value: &Value, bound: &Value) -> bool {
    matches!(value.compare_exact(bound), Some(Ordering::Less))
}

fn match_text(op: TextOp, text: &str, needle: &str) -> bool {
    match op {
        TextOp::BeginsWith => text.starts_with(needle),
        TextOp::EndsWith => text.ends_with(needle),
        TextOp::Contains => text.contains(needle),
    }
}

// ============================================================================
// Typed accessors
// ============================================================================

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

fn mismatch(expected: &str, val: &Value) -> Error {
    Error::TypeMismatch { expected: expected.into(), got: val.type_name().into() }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_i64().ok_or_else(|| mismatch("int", val))
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_f64().ok_or_else(|| mismatch("double", val))
    }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_bool().ok_or_else(|| mismatch("bool", val))
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_str().map(str::to_owned).ok_or_else(|| mismatch("string", val))
    }
}

impl FromValue for rust_decimal::Decimal {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_decimal().ok_or_else(|| mismatch("decimal", val))
    }
}

impl FromValue for ObjectKey {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_object().ok_or_else(|| mismatch("object", val))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(val: &Value) -> Result<Self> {
        if val.is_null() { Ok(None) } else { T::from_value(val).map(Some) }
    }
}
