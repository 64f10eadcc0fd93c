use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{BinaryOperator, Expr, Ident, Query, Select, TableFactor, Value, Visit, Visitor};

use crate::enforcer::scope::direct_relations;
use crate::error::ValidationError;
use crate::parser::names::{
    ident_key, normalize_table_reference, policy_ident, split_table_name, terminal_ident,
};
use crate::policy::AccessPolicy;

/// Identity of the user a query runs for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    /// Numeric identity, rendered as a number literal.
    Int(i64),
    /// Textual identity, rendered as a quoted string literal.
    Text(String),
}

impl UserId {
    /// The identity as a SQL literal.
    pub fn to_expr(&self) -> Expr {
        match self {
            UserId::Int(id) => Expr::value(Value::Number(id.to_string(), false)),
            UserId::Text(id) => Expr::value(Value::SingleQuotedString(id.clone())),
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Int(id) => write!(f, "{id}"),
            UserId::Text(id) => f.write_str(id),
        }
    }
}

impl FromStr for UserId {
    type Err = Infallible;

    /// Integers become [`UserId::Int`]; anything else is kept as text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(s.parse::<i64>()
            .map_or_else(|_| UserId::Text(s.to_string()), UserId::Int))
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId::Int(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId::Text(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        UserId::Text(id)
    }
}

/// Which tables get the user-scope predicate, and for whom.
#[derive(Debug, Clone)]
pub struct ScopingRules<'p> {
    /// Policy the tables resolve against.
    pub policy: &'p AccessPolicy,
    /// Identity injected into every predicate.
    pub user: UserId,
    /// Also scope global tables that declare a `user_key`.
    pub include_global: bool,
    /// Tables opted out for this request, as normalized `(schema, table)` keys.
    pub skip_tables: BTreeSet<(Option<String>, String)>,
}

impl<'p> ScopingRules<'p> {
    /// Rules scoping every user-scoped table of `policy` to `user`.
    pub fn new(policy: &'p AccessPolicy, user: UserId) -> Self {
        Self {
            policy,
            user,
            include_global: false,
            skip_tables: BTreeSet::new(),
        }
    }

    /// Opt `[schema.]table` out of scoping.
    pub fn skip_table(mut self, name: &str) -> Self {
        self.skip_tables.insert(normalize_table_reference(name));
        self
    }

    fn skipped(&self, schema: &str, table: &str) -> bool {
        self.skip_tables
            .iter()
            .any(|(s, t)| t == table && s.as_deref().is_none_or(|s| s == schema))
    }

    /// User-scoped tables a SELECT lists directly in its own FROM/JOIN clause.
    ///
    /// Tables only reachable through a derived table or CTE are not included:
    /// those get their predicate in the SELECT that lists them.
    pub fn scoped_sources(&self, select: &Select) -> Result<Vec<ScopedSource>, ValidationError> {
        let mut scoped = Vec::new();
        for factor in direct_relations(select) {
            let TableFactor::Table {
                name,
                alias,
                args: None,
                ..
            } = factor
            else {
                continue;
            };
            let (schema, table) = split_table_name(name)?;
            let Some(resolved) = self.policy.resolve_table(schema.as_deref(), &table) else {
                continue;
            };
            let Some(key) = resolved.policy.scoping_column(self.include_global) else {
                continue;
            };
            if self.skipped(resolved.schema, resolved.name) {
                continue;
            }
            scoped.push(ScopedSource {
                qualifier: match alias {
                    Some(alias) => alias.name.clone(),
                    None => terminal_ident(name)?,
                },
                table: resolved.qualified_name(),
                key: key.to_string(),
            });
        }
        Ok(scoped)
    }
}

/// A user-scoped table as listed by one SELECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedSource {
    /// Alias, else the table name as written.
    pub qualifier: Ident,
    /// `schema.table`.
    pub table: String,
    /// Normalized scoping column.
    pub key: String,
}

impl ScopedSource {
    /// `qualifier.key = user`.
    pub fn predicate(&self, user: &UserId) -> Expr {
        Expr::BinaryOp {
            left: Box::new(Expr::CompoundIdentifier(vec![
                self.qualifier.clone(),
                policy_ident(&self.key),
            ])),
            op: BinaryOperator::Eq,
            right: Box::new(user.to_expr()),
        }
    }
}

/// True when `expr` references the scoping column of any of `sources`.
///
/// Qualified references (`e.id`) count anywhere, including correlated uses in
/// subqueries. Unqualified ones (`id`) count only outside subqueries, where
/// they bind to this SELECT's sources.
pub fn references_scoping_column(expr: &Expr, sources: &[ScopedSource]) -> bool {
    let mut finder = KeyReference {
        sources,
        depth: 0,
    };
    expr.visit(&mut finder).is_break()
}

struct KeyReference<'s> {
    sources: &'s [ScopedSource],
    depth: usize,
}

impl KeyReference<'_> {
    fn matches(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Identifier(column) if self.depth == 0 => {
                let column = ident_key(column);
                self.sources.iter().any(|s| s.key == column)
            }
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [.., qualifier, column] => {
                    let (qualifier, column) = (ident_key(qualifier), ident_key(column));
                    self.sources
                        .iter()
                        .any(|s| s.key == column && ident_key(&s.qualifier) == qualifier)
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl Visitor for KeyReference<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth -= 1;
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.matches(expr) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
