//! Predicate compiler: expression tree → canonical filter text + arguments.
//!
//! Output grammar:
//!
//! ```text
//! comparison   path OP %@                     OP ∈ == != < <= > >=
//! text         path BEGINSWITH|ENDSWITH|CONTAINS[c]? %@
//! closed       path BETWEEN {%@, %@}
//! half-open    path >= %@ && path < %@
//! membership   %@ IN path
//! aggregate    path.@min >= %@ && path.@max <= %@    (`<` when half-open)
//! logical      child && child ...  |  child || child ...
//! ```
//!
//! Compound forms nested inside a logical node are parenthesized. Literals
//! never appear in the text; each `%@` consumes the next argument. Property
//! names are schema-validated identifiers and need no escaping.

use std::fmt;
use std::fmt::Write as _;

use tracing::trace;

use super::expr::{Case, Expr, ExprNode, LogicalOp};
use crate::model::Value;

const PLACEHOLDER: &str = "%@";

/// A compiled filter: canonical text, ordered arguments, and the expression
/// tree the executor evaluates.
#[derive(Clone)]
pub struct CompiledPredicate {
    format: String,
    arguments: Vec<Value>,
    root: Expr,
}

impl CompiledPredicate {
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn expr(&self) -> &Expr {
        &self.root
    }
}

impl PartialEq for CompiledPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.format == other.format && self.arguments == other.arguments
    }
}

impl fmt::Debug for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPredicate")
            .field("format", &self.format)
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Human-readable form with arguments substituted, for logs and errors.
impl fmt::Display for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args = self.arguments.iter();
        let mut pieces = self.format.split(PLACEHOLDER);
        if let Some(first) = pieces.next() {
            f.write_str(first)?;
        }
        for piece in pieces {
            match args.next() {
                Some(arg) => write!(f, "{arg}")?,
                None => f.write_str(PLACEHOLDER)?,
            }
            f.write_str(piece)?;
        }
        Ok(())
    }
}

/// Compile an expression tree. Pure and deterministic.
pub fn compile(expr: &Expr) -> CompiledPredicate {
    let mut emitter = Emitter::default();
    emitter.emit(expr, false);
    trace!(format = %emitter.format, arguments = emitter.arguments.len(), "compiled predicate");
    CompiledPredicate { format: emitter.format, arguments: emitter.arguments, root: expr.clone() }
}

#[derive(Default)]
struct Emitter {
    format: String,
    arguments: Vec<Value>,
}

impl Emitter {
    fn arg(&mut self, value: &Value) {
        self.format.push_str(PLACEHOLDER);
        self.arguments.push(value.clone());
    }

    fn text(&mut self, s: impl fmt::Display) {
        // writing into a String cannot fail
        let _ = write!(self.format, "{s}");
    }

    fn emit(&mut self, expr: &Expr, nested: bool) {
        let compound = matches!(
            expr.node(),
            ExprNode::Logical { .. }
                | ExprNode::AggregateRange { .. }
                | ExprNode::Range { inclusive: false, .. }
        );
        let wrap = nested && compound;
        if wrap {
            self.format.push('(');
        }
        match expr.node() {
            ExprNode::Comparison { op, path, value } => {
                self.text(format_args!("{path} {} ", op.symbol()));
                self.arg(value);
            }
            ExprNode::Text { op, path, value, case } => {
                let modifier = if *case == Case::Insensitive { "[c]" } else { "" };
                self.text(format_args!("{path} {}{modifier} ", op.keyword()));
                self.arg(&Value::String(value.clone()));
            }
            ExprNode::Range { path, lo, hi, inclusive: true } => {
                self.text(format_args!("{path} BETWEEN {{"));
                self.arg(lo);
                self.text(", ");
                self.arg(hi);
                self.text("}");
            }
            ExprNode::Range { path, lo, hi, inclusive: false } => {
                self.text(format_args!("{path} >= "));
                self.arg(lo);
                self.text(format_args!(" && {path} < "));
                self.arg(hi);
            }
            ExprNode::Membership { path, element } => {
                self.arg(element);
                self.text(format_args!(" IN {path}"));
            }
            ExprNode::AggregateRange { path, lo, hi, inclusive } => {
                self.text(format_args!("{path}.@min >= "));
                self.arg(lo);
                let upper = if *inclusive { "<=" } else { "<" };
                self.text(format_args!(" && {path}.@max {upper} "));
                self.arg(hi);
            }
            ExprNode::Logical { op, children } => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        self.text(format_args!(" {} ", op.symbol()));
                    }
                    self.emit(child, true);
                }
                if children.is_empty() {
                    self.text(if *op == LogicalOp::And { "TRUEPREDICATE" } else { "FALSEPREDICATE" });
                }
            }
        }
        if wrap {
            self.format.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{ClassSchema, PropertyKind, Schema, TypeFamily};
    use crate::query::{Bounds, PropertyRef};

    fn schema() -> Schema {
        Schema::new().with_class(
            ClassSchema::new("Row")
                .with("intCol", PropertyKind::scalar(TypeFamily::Integer))
                .with("stringCol", PropertyKind::scalar(TypeFamily::String))
                .with("optInt", PropertyKind::optional(TypeFamily::Integer))
                .with("arrayInt", PropertyKind::list(TypeFamily::Integer)),
        )
    }

    fn prop(name: &str) -> PropertyRef {
        PropertyRef::resolve(&schema(), "Row", &[name]).unwrap()
    }

    #[test]
    fn test_equality() {
        let p = compile(&prop("intCol").equals(5).unwrap());
        assert_eq!(p.format(), "intCol == %@");
        assert_eq!(p.arguments(), &[Value::Int32(5)]);
    }

    #[test]
    fn test_null_marker() {
        let p = compile(&prop("optInt").is_null().unwrap());
        assert_eq!(p.format(), "optInt == %@");
        assert_eq!(p.arguments(), &[Value::Null]);
        assert_eq!(compile(&prop("optInt").is_not_null().unwrap()).format(), "optInt != %@");
    }

    #[test]
    fn test_ranges_have_distinct_forms() {
        let half = compile(&prop("intCol").contains_range(5..6).unwrap());
        assert_eq!(half.format(), "intCol >= %@ && intCol < %@");
        assert_eq!(half.arguments(), &[Value::Int32(5), Value::Int32(6)]);

        let closed = compile(&prop("intCol").contains_range(5..=6).unwrap());
        assert_eq!(closed.format(), "intCol BETWEEN {%@, %@}");
        assert_eq!(closed, compile(&prop("intCol").between(5, 6).unwrap()));
    }

    #[test]
    fn test_membership_and_aggregate_range() {
        let m = compile(&prop("arrayInt").contains_element(1).unwrap());
        assert_eq!(m.format(), "%@ IN arrayInt");
        assert_eq!(m.arguments(), &[Value::Int32(1)]);

        let closed = compile(&prop("arrayInt").contains_all_within(1..=2).unwrap());
        assert_eq!(closed.format(), "arrayInt.@min >= %@ && arrayInt.@max <= %@");
        let half = compile(&prop("arrayInt").contains_all_within(Bounds::half_open(1, 2)).unwrap());
        assert_eq!(half.format(), "arrayInt.@min >= %@ && arrayInt.@max < %@");
    }

    #[test]
    fn test_nested_compound_forms_are_parenthesized() {
        let expr = prop("stringCol").begins_with("a", Case::Insensitive).unwrap()
            & (prop("intCol").contains_range(1..3).unwrap() | prop("intCol").equals(9).unwrap());
        let p = compile(&expr);
        assert_eq!(p.format(), "stringCol BEGINSWITH[c] %@ && ((intCol >= %@ && intCol < %@) || intCol == %@)");
        assert_eq!(
            p.arguments(),
            &[Value::from("a"), Value::Int32(1), Value::Int32(3), Value::Int32(9)]
        );
        assert_eq!(p.to_string(), "stringCol BEGINSWITH[c] \"a\" && ((intCol >= 1 && intCol < 3) || intCol == 9)");
    }

    #[test]
    fn test_compile_is_idempotent() {
        let expr = prop("intCol").greater_than(1).unwrap() & prop("arrayInt").contains_element(2).unwrap();
        let a = compile(&expr);
        let b = compile(&expr);
        assert_eq!(a.format(), b.format());
        assert_eq!(a.arguments(), b.arguments());
    }
}
