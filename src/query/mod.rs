//! # Query Construction
//!
//! Typed predicate building and compilation.
//!
//! ```text
//! Schema ──resolve──▶ PropertyRef ──combinators──▶ Expr ──compile──▶ CompiledPredicate
//! ```
//!
//! Type compatibility is checked once, when a node is built. Everything
//! downstream (the compiler, the executor) trusts the tree.

pub mod compile;
pub mod expr;
pub mod property;

pub use compile::{CompiledPredicate, compile};
pub use expr::{Case, CompareOp, Expr, ExprNode, LogicalOp, TextOp};
pub use property::{Bounds, PropertyPath, PropertyRef};
