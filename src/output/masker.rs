use std::convert::Infallible;
use std::ops::ControlFlow;

use sqlparser::ast::{visit_expressions_mut, Expr, Statement, Value};

/// Placeholder every literal is replaced with.
pub const MASK: &str = "?";

/// Normalized form of a validated statement for use as a cache key.
///
/// Every literal (including the injected user identity and the row limit) is
/// replaced by a `?` placeholder, so the key groups queries by shape and never
/// carries one user's values into another user's lookup.
pub fn cache_key(statement: &Statement) -> String {
    let mut masked = statement.clone();
    let flow = visit_expressions_mut(&mut masked, |expr| {
        if let Expr::Value(literal) = expr {
            literal.value = Value::Placeholder(MASK.to_string());
        }
        ControlFlow::<Infallible>::Continue(())
    });
    match flow {
        ControlFlow::Continue(()) => masked.to_string(),
        ControlFlow::Break(never) => match never {},
    }
}
