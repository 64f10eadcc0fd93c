use std::ops::ControlFlow;

use sqlparser::ast::{
    Expr, Ident, ObjectName, Query, Select, SelectItem, SelectItemQualifiedWildcardKind, SetExpr,
    Statement, TableFactor, VisitMut, VisitorMut, WildcardAdditionalOptions,
};

use crate::enforcer::scope::direct_relations;
use crate::error::{finish, flow, ValidationError};
use crate::parser::names::{ident_key, policy_ident, split_table_name, terminal_ident};
use crate::policy::{AccessPolicy, ColumnSet};

/// Expand wildcards over column-restricted tables into their allowed columns.
///
/// `*` and `t.*` over a restricted table become the sorted allowed columns,
/// qualified by the table's alias. Other sources keep a qualified wildcard.
/// Queries are rewritten innermost first, and expanding twice is a no-op.
pub fn expand_wildcards(statement: &mut Statement, policy: &AccessPolicy) -> Result<(), ValidationError> {
    finish(statement.visit(&mut StarExpander { policy }))
}

struct StarExpander<'p> {
    policy: &'p AccessPolicy,
}

/// A FROM item as wildcard expansion sees it.
enum StarSource {
    Restricted { qualifier: Ident, columns: Vec<String> },
    Open { qualifier: Option<Ident> },
}

impl StarSource {
    fn qualifier(&self) -> Option<&Ident> {
        match self {
            StarSource::Restricted { qualifier, .. } => Some(qualifier),
            StarSource::Open { qualifier } => qualifier.as_ref(),
        }
    }
}

impl VisitorMut for StarExpander<'_> {
    type Break = ValidationError;

    fn post_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        flow(self.expand_body(&mut query.body))
    }
}

impl StarExpander<'_> {
    fn expand_body(&self, body: &mut SetExpr) -> Result<(), ValidationError> {
        match body {
            SetExpr::Select(select) => self.expand_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.expand_body(left)?;
                self.expand_body(right)
            }
            _ => Ok(()),
        }
    }

    fn expand_select(&self, select: &mut Select) -> Result<(), ValidationError> {
        let sources: Vec<StarSource> = direct_relations(select)
            .into_iter()
            .map(|factor| self.star_source(factor))
            .collect();
        if !sources
            .iter()
            .any(|s| matches!(s, StarSource::Restricted { .. }))
        {
            return Ok(());
        }

        let mut projection = Vec::with_capacity(select.projection.len());
        for item in select.projection.drain(..) {
            match item {
                SelectItem::Wildcard(options) => {
                    require_plain(&options)?;
                    for source in &sources {
                        expand_source(source, &mut projection)?;
                    }
                }
                SelectItem::QualifiedWildcard(
                    SelectItemQualifiedWildcardKind::ObjectName(name),
                    options,
                ) => {
                    let qualifier = ident_key(&terminal_ident(&name)?);
                    let restricted = sources.iter().find(|source| {
                        matches!(source, StarSource::Restricted { .. })
                            && source.qualifier().map(ident_key).as_deref() == Some(qualifier.as_str())
                    });
                    match restricted {
                        Some(source) => {
                            require_plain(&options)?;
                            expand_source(source, &mut projection)?;
                        }
                        None => projection.push(SelectItem::QualifiedWildcard(
                            SelectItemQualifiedWildcardKind::ObjectName(name),
                            options,
                        )),
                    }
                }
                other => projection.push(other),
            }
        }
        select.projection = projection;
        Ok(())
    }

    fn star_source(&self, factor: &TableFactor) -> StarSource {
        match factor {
            TableFactor::Table {
                name,
                alias,
                args: None,
                ..
            } => {
                let qualifier = alias
                    .as_ref()
                    .map(|a| a.name.clone())
                    .or_else(|| terminal_ident(name).ok());
                let table = split_table_name(name)
                    .ok()
                    .and_then(|(schema, table)| self.policy.resolve_table(schema.as_deref(), &table));
                match (table.map(|t| &t.policy.columns), qualifier) {
                    (Some(ColumnSet::Only(columns)), Some(qualifier)) => StarSource::Restricted {
                        qualifier,
                        columns: columns.iter().cloned().collect(),
                    },
                    (_, qualifier) => StarSource::Open { qualifier },
                }
            }
            TableFactor::Table { name, alias, .. } => StarSource::Open {
                qualifier: alias
                    .as_ref()
                    .map(|a| a.name.clone())
                    .or_else(|| terminal_ident(name).ok()),
            },
            TableFactor::Derived { alias, .. } => StarSource::Open {
                qualifier: alias.as_ref().map(|a| a.name.clone()),
            },
            _ => StarSource::Open { qualifier: None },
        }
    }
}

fn expand_source(source: &StarSource, projection: &mut Vec<SelectItem>) -> Result<(), ValidationError> {
    match source {
        StarSource::Restricted { qualifier, columns } => {
            projection.extend(columns.iter().map(|column| {
                SelectItem::UnnamedExpr(Expr::CompoundIdentifier(vec![
                    qualifier.clone(),
                    policy_ident(column),
                ]))
            }));
            Ok(())
        }
        StarSource::Open {
            qualifier: Some(qualifier),
        } => {
            projection.push(SelectItem::QualifiedWildcard(
                SelectItemQualifiedWildcardKind::ObjectName(ObjectName::from(vec![qualifier.clone()])),
                WildcardAdditionalOptions::default(),
            ));
            Ok(())
        }
        StarSource::Open { qualifier: None } => Err(ValidationError::unsupported(
            "wildcard over an unaliased source joined with a column-restricted table",
        )),
    }
}

fn require_plain(options: &WildcardAdditionalOptions) -> Result<(), ValidationError> {
    if *options == WildcardAdditionalOptions::default() {
        Ok(())
    } else {
        Err(ValidationError::unsupported(format!("wildcard options `{options}`")))
    }
}
