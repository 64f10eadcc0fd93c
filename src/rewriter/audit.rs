use std::ops::ControlFlow;

use sqlparser::ast::{BinaryOperator, Expr, Query, Select, SetExpr, Statement, Visit, Visitor};
use tracing::error;

use crate::error::{finish, flow, ValidationError};
use crate::rewriter::predicate::ScopingRules;

/// Verify the rewritten tree: every SELECT listing a user-scoped table must
/// carry that table's `qualifier.key = user` predicate as a top-level conjunct.
///
/// Top-level means reachable from the WHERE root through AND nodes and
/// parentheses only; a match inside an OR branch does not count. The check is
/// over the tree, never over rendered text.
pub fn audit_user_scope(statement: &Statement, rules: &ScopingRules<'_>) -> Result<(), ValidationError> {
    finish(statement.visit(&mut Auditor { rules }))
}

struct Auditor<'r, 'p> {
    rules: &'r ScopingRules<'p>,
}

impl Visitor for Auditor<'_, '_> {
    type Break = ValidationError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        flow(self.audit_body(&query.body))
    }
}

impl Auditor<'_, '_> {
    fn audit_body(&self, body: &SetExpr) -> Result<(), ValidationError> {
        match body {
            SetExpr::Select(select) => self.audit_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.audit_body(left)?;
                self.audit_body(right)
            }
            _ => Ok(()),
        }
    }

    fn audit_select(&self, select: &Select) -> Result<(), ValidationError> {
        let mut conjuncts = Vec::new();
        if let Some(selection) = &select.selection {
            top_level_conjuncts(selection, &mut conjuncts);
        }
        for source in self.rules.scoped_sources(select)? {
            let expected = source.predicate(&self.rules.user);
            if !conjuncts.iter().any(|conjunct| **conjunct == expected) {
                error!(
                    table = %source.table,
                    %expected,
                    "user-scope predicate missing after rewrite"
                );
                return Err(ValidationError::AuditFailed {
                    table: source.table,
                    expected: expected.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Collect the conjuncts reachable from `expr` through AND and parentheses.
pub fn top_level_conjuncts<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            top_level_conjuncts(left, out);
            top_level_conjuncts(right, out);
        }
        Expr::Nested(inner) => top_level_conjuncts(inner, out),
        other => out.push(other),
    }
}
