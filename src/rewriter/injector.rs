use std::collections::BTreeSet;
use std::ops::ControlFlow;

use sqlparser::ast::{BinaryOperator, Expr, Query, Select, SetExpr, Statement, VisitMut, VisitorMut};
use tracing::debug;

use crate::error::{finish, flow, ValidationError};
use crate::rewriter::predicate::{references_scoping_column, ScopedSource, ScopingRules};

/// Inject the user-scope predicate into every SELECT that lists a user-scoped
/// table in its own FROM/JOIN clause.
///
/// Per SELECT: every predicate on a scoping column is stripped from WHERE
/// (collapsing the AND/OR it sat in), the remainder is parenthesized, and
/// `qualifier.key = user` is ANDed on at the top level for each scoped table.
/// Running it again over its own output changes nothing.
///
/// Returns the scoped tables as `schema.table`.
pub fn inject_user_scope(
    statement: &mut Statement,
    rules: &ScopingRules<'_>,
) -> Result<BTreeSet<String>, ValidationError> {
    let mut injector = Injector {
        rules,
        scoped: BTreeSet::new(),
    };
    finish(statement.visit(&mut injector))?;
    Ok(injector.scoped)
}

struct Injector<'r, 'p> {
    rules: &'r ScopingRules<'p>,
    scoped: BTreeSet<String>,
}

impl VisitorMut for Injector<'_, '_> {
    type Break = ValidationError;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        flow(self.inject_body(&mut query.body))
    }
}

impl Injector<'_, '_> {
    fn inject_body(&mut self, body: &mut SetExpr) -> Result<(), ValidationError> {
        match body {
            SetExpr::Select(select) => self.inject_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.inject_body(left)?;
                self.inject_body(right)
            }
            _ => Ok(()),
        }
    }

    fn inject_select(&mut self, select: &mut Select) -> Result<(), ValidationError> {
        let sources = self.rules.scoped_sources(select)?;
        if sources.is_empty() {
            return Ok(());
        }

        let remainder = select
            .selection
            .take()
            .and_then(|selection| strip_scoping_predicates(selection, &sources))
            .map(parenthesize);

        let mut selection = remainder;
        for source in &sources {
            let predicate = source.predicate(&self.rules.user);
            debug!(table = %source.table, %predicate, "injecting user scope");
            selection = Some(match selection {
                Some(existing) => and(existing, predicate),
                None => predicate,
            });
            self.scoped.insert(source.table.clone());
        }
        select.selection = selection;
        Ok(())
    }
}

/// Remove every leaf predicate that references a scoping column.
///
/// AND/OR nodes with one side removed collapse to the other side; with both
/// sides removed they disappear. `None` means nothing is left.
pub fn strip_scoping_predicates(expr: Expr, sources: &[ScopedSource]) -> Option<Expr> {
    match expr {
        Expr::BinaryOp { left, op, right }
            if matches!(op, BinaryOperator::And | BinaryOperator::Or) =>
        {
            let left = strip_scoping_predicates(*left, sources);
            let right = strip_scoping_predicates(*right, sources);
            match (left, right) {
                (Some(left), Some(right)) => Some(Expr::BinaryOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                }),
                (Some(side), None) | (None, Some(side)) => Some(side),
                (None, None) => None,
            }
        }
        Expr::Nested(inner) => {
            strip_scoping_predicates(*inner, sources).map(|e| Expr::Nested(Box::new(e)))
        }
        leaf if references_scoping_column(&leaf, sources) => None,
        leaf => Some(leaf),
    }
}

fn parenthesize(expr: Expr) -> Expr {
    match expr {
        Expr::Nested(_) => expr,
        other => Expr::Nested(Box::new(other)),
    }
}

fn and(left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op: BinaryOperator::And,
        right: Box::new(right),
    }
}
