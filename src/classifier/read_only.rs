use std::ops::ControlFlow;

use sqlparser::ast::{Query, SetExpr, Statement, Visit, Visitor};

use crate::error::{finish, flow, ValidationError};

/// Reject write, lock and DDL constructs anywhere in the tree.
///
/// The root check only looks at the outermost statement; this sweep covers
/// data-modifying CTEs, `SELECT ... INTO`, row locks and `TABLE name`.
pub fn check_read_only(statement: &Statement) -> Result<(), ValidationError> {
    finish(statement.visit(&mut ReadOnlySweep))
}

struct ReadOnlySweep;

impl Visitor for ReadOnlySweep {
    type Break = ValidationError;

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        match statement {
            Statement::Query(_) => ControlFlow::Continue(()),
            other => ControlFlow::Break(disallowed(format!("nested statement `{other}`"))),
        }
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if !query.locks.is_empty() {
            return ControlFlow::Break(disallowed("row-locking clause".to_string()));
        }
        flow(check_body(&query.body))
    }
}

fn check_body(body: &SetExpr) -> Result<(), ValidationError> {
    match body {
        SetExpr::Select(select) if select.into.is_some() => {
            Err(disallowed("SELECT INTO".to_string()))
        }
        SetExpr::Select(_) | SetExpr::Values(_) | SetExpr::Query(_) => Ok(()),
        SetExpr::SetOperation { left, right, .. } => {
            check_body(left)?;
            check_body(right)
        }
        SetExpr::Table(table) => Err(disallowed(format!("TABLE shorthand `{table}`"))),
        other => Err(disallowed(format!("data-modifying query `{other}`"))),
    }
}

fn disallowed(what: String) -> ValidationError {
    ValidationError::DisallowedStatement(what)
}
