//! Compute module - Expression trees, coefficient fitting and the search engine.

pub mod expr;
pub mod fit;
pub mod search;

pub use expr::{Expr, ExprError, ExprKind, UnaryOp};
pub use fit::regress;
