use sqlparser::ast::{Expr, LimitClause, Query, Statement};
use tracing::debug;

use crate::error::ValidationError;
use crate::parser::expr::{number_expr, number_literal};

/// Row cap for one validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLimit {
    /// Injected when the query has no limit.
    pub default: u64,
    /// Upper bound for any limit.
    pub max: u64,
}

impl RowLimit {
    /// Build a cap; the default never exceeds the maximum.
    pub fn new(default: u64, max: u64) -> Self {
        Self {
            default: default.min(max),
            max,
        }
    }

    fn cap(&self, requested: Option<&Expr>) -> u64 {
        match requested {
            None => self.default,
            Some(expr) => match number_literal(expr) {
                Some(n) => n.min(self.max),
                None => self.max,
            },
        }
    }
}

/// Inject or clamp the row limit of the outermost query.
///
/// Absent (or `LIMIT ALL`) becomes the default, numeric limits above the
/// maximum are clamped, and anything non-numeric is replaced by the maximum.
/// `FETCH FIRST n ROWS` is folded into a plain LIMIT. Subqueries are not capped.
pub fn enforce_limit(statement: &mut Statement, limit: RowLimit) -> Result<u64, ValidationError> {
    match statement {
        Statement::Query(query) => Ok(enforce_query_limit(query, limit)),
        other => Err(ValidationError::DisallowedStatement(other.to_string())),
    }
}

fn enforce_query_limit(query: &mut Query, limit: RowLimit) -> u64 {
    let fetched = query.fetch.take().map(|fetch| match fetch.quantity {
        Some(quantity) if !fetch.percent => quantity,
        Some(_) => number_expr(limit.max),
        None => number_expr(1),
    });

    let clause = query
        .limit_clause
        .get_or_insert_with(|| LimitClause::LimitOffset {
            limit: None,
            offset: None,
            limit_by: Vec::new(),
        });
    let applied = match clause {
        LimitClause::LimitOffset {
            limit: requested, ..
        } => {
            let cap = limit.cap(requested.as_ref().or(fetched.as_ref()));
            *requested = Some(number_expr(cap));
            cap
        }
        LimitClause::OffsetCommaLimit {
            limit: requested, ..
        } => {
            let cap = limit.cap(Some(&*requested));
            *requested = number_expr(cap);
            cap
        }
    };
    debug!(limit = applied, "row limit enforced");
    applied
}
