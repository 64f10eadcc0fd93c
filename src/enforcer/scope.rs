use sqlparser::ast::{Ident, Select, TableFactor, TableWithJoins};

use crate::error::ValidationError;
use crate::parser::names::ident_key;
use crate::policy::{ColumnSet, ResolvedTable};

/// What a FROM item provides to the SELECT that lists it.
#[derive(Debug, Clone)]
pub enum SourceKind<'p> {
    /// A real table from the policy.
    Table(ResolvedTable<'p>),
    /// A derived table, CTE reference or table function. `None` when its
    /// output columns are not statically known.
    Relation(Option<Vec<String>>),
}

/// One FROM item of a SELECT.
#[derive(Debug, Clone)]
pub struct Source<'p> {
    /// Name the rest of the query uses for it: the alias, else the table name.
    pub qualifier: Option<Ident>,
    /// What it provides.
    pub kind: SourceKind<'p>,
}

/// How a source relates to a column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMatch {
    /// The source is known to expose the column and may be read.
    Definite,
    /// The source might expose it; every column it exposes may be read.
    Possible,
    /// A restricted table that does not list the column. The column may still
    /// exist in the database, so it must never be resolved past this source.
    Hidden,
    /// Known not to be provided.
    Absent,
}

impl Source<'_> {
    /// Normalized qualifier, if any.
    pub fn qualifier_key(&self) -> Option<String> {
        self.qualifier.as_ref().map(ident_key)
    }

    /// Name used in diagnostics.
    pub fn label(&self) -> String {
        match (&self.kind, &self.qualifier) {
            (SourceKind::Table(table), _) => table.qualified_name(),
            (SourceKind::Relation(_), Some(qualifier)) => qualifier.value.clone(),
            (SourceKind::Relation(_), None) => "subquery".to_string(),
        }
    }

    /// Classify `column` (normalized) against this source.
    pub fn column_match(&self, column: &str) -> ColumnMatch {
        match &self.kind {
            SourceKind::Table(table) => match &table.policy.columns {
                ColumnSet::All => ColumnMatch::Possible,
                ColumnSet::Only(allowed) if allowed.contains(column) => ColumnMatch::Definite,
                ColumnSet::Only(_) => ColumnMatch::Hidden,
            },
            SourceKind::Relation(None) => ColumnMatch::Possible,
            SourceKind::Relation(Some(columns)) if columns.iter().any(|c| c == column) => {
                ColumnMatch::Definite
            }
            SourceKind::Relation(Some(_)) => ColumnMatch::Absent,
        }
    }

    /// Columns a wildcard over this source yields, when statically known.
    pub fn wildcard_columns(&self) -> Option<Vec<String>> {
        match &self.kind {
            SourceKind::Table(table) => match &table.policy.columns {
                ColumnSet::All => None,
                ColumnSet::Only(allowed) => Some(allowed.iter().cloned().collect()),
            },
            SourceKind::Relation(columns) => columns.clone(),
        }
    }
}

/// Outcome of looking an unqualified column up in one scope level.
enum Lookup {
    Found,
    /// Only sources that may or may not carry the column. When none of them
    /// does, the name binds to an enclosing query instead.
    Possible(Vec<String>),
    Missing,
    Ambiguous(Vec<String>),
    Denied(String),
}

/// The sources visible to one SELECT, chained to the enclosing query's scope
/// for correlated references.
#[derive(Debug, Clone, Default)]
pub struct Scope<'a, 'p> {
    /// FROM items of this SELECT, in order.
    pub sources: Vec<Source<'p>>,
    /// Enclosing scope of a subquery.
    pub parent: Option<&'a Scope<'a, 'p>>,
}

impl<'a, 'p> Scope<'a, 'p> {
    /// A scope with no sources of its own.
    pub fn empty(parent: Option<&'a Scope<'a, 'p>>) -> Self {
        Self {
            sources: Vec::new(),
            parent,
        }
    }

    /// Find the source an explicit qualifier names, innermost scope first.
    pub fn find_qualifier(&self, qualifier: &Ident) -> Option<&Source<'p>> {
        let key = ident_key(qualifier);
        let mut scope = Some(self);
        while let Some(current) = scope {
            let found = current
                .sources
                .iter()
                .find(|source| source.qualifier_key().as_deref() == Some(key.as_str()));
            if found.is_some() {
                return found;
            }
            scope = current.parent;
        }
        None
    }

    /// Resolve an unqualified column reference, innermost scope first.
    ///
    /// Returns `Ok(false)` when no scope could supply the column.
    pub fn locate_column(&self, column: &Ident) -> Result<bool, ValidationError> {
        let key = ident_key(column);
        let mut scope = Some(self);
        while let Some(current) = scope {
            match current.lookup(&key) {
                Lookup::Found => return Ok(true),
                Lookup::Possible(candidates) => {
                    return match hidden_above(current.parent, &key) {
                        Some(hidden) => Err(ValidationError::AmbiguousColumn {
                            column: column.value.clone(),
                            candidates: candidates.into_iter().chain(hidden).collect(),
                        }),
                        None => Ok(true),
                    };
                }
                Lookup::Missing => scope = current.parent,
                Lookup::Ambiguous(candidates) => {
                    return Err(ValidationError::AmbiguousColumn {
                        column: column.value.clone(),
                        candidates,
                    });
                }
                Lookup::Denied(table) => {
                    return Err(ValidationError::denied_column(
                        Some(table),
                        column.value.clone(),
                    ));
                }
            }
        }
        Ok(false)
    }

    /// Like [`Scope::locate_column`], denying columns nothing supplies.
    pub fn resolve_column(&self, column: &Ident) -> Result<(), ValidationError> {
        if self.locate_column(column)? {
            Ok(())
        } else {
            Err(ValidationError::denied_column(None, column.value.clone()))
        }
    }

    fn lookup(&self, column: &str) -> Lookup {
        let mut definite = Vec::new();
        let mut possible = Vec::new();
        let mut hidden = Vec::new();
        for source in &self.sources {
            match source.column_match(column) {
                ColumnMatch::Definite => definite.push(source.label()),
                ColumnMatch::Possible => possible.push(source.label()),
                ColumnMatch::Hidden => hidden.push(source.label()),
                ColumnMatch::Absent => {}
            }
        }

        match (definite.len(), possible.len()) {
            (0, 0) => match hidden.into_iter().next() {
                Some(table) => Lookup::Denied(table),
                None => Lookup::Missing,
            },
            (0, _) if !hidden.is_empty() => {
                possible.extend(hidden);
                Lookup::Ambiguous(possible)
            }
            (0, _) => Lookup::Possible(possible),
            (1, _) => Lookup::Found,
            _ => Lookup::Ambiguous(definite),
        }
    }
}

/// Restricted sources in enclosing scopes that hide `column`, up to the first
/// level that definitely supplies it.
fn hidden_above(mut scope: Option<&Scope<'_, '_>>, column: &str) -> Option<Vec<String>> {
    while let Some(current) = scope {
        let mut hidden = Vec::new();
        let mut definite = false;
        for source in &current.sources {
            match source.column_match(column) {
                ColumnMatch::Hidden => hidden.push(source.label()),
                ColumnMatch::Definite => definite = true,
                ColumnMatch::Possible | ColumnMatch::Absent => {}
            }
        }
        if !hidden.is_empty() {
            return Some(hidden);
        }
        if definite {
            return None;
        }
        scope = current.parent;
    }
    None
}

/// FROM items a SELECT lists itself, with joins and parenthesized joins
/// flattened. Subqueries are single items; their own FROM lists are not included.
pub fn direct_relations(select: &Select) -> Vec<&TableFactor> {
    let mut out = Vec::new();
    for table in &select.from {
        collect_relations(table, &mut out);
    }
    out
}

fn collect_relations<'s>(table: &'s TableWithJoins, out: &mut Vec<&'s TableFactor>) {
    push_relation(&table.relation, out);
    for join in &table.joins {
        push_relation(&join.relation, out);
    }
}

fn push_relation<'s>(factor: &'s TableFactor, out: &mut Vec<&'s TableFactor>) {
    match factor {
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_relations(table_with_joins, out),
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AccessPolicy, TablePolicy};

    fn policy() -> AccessPolicy {
        AccessPolicy::builder()
            .table(
                "hr",
                "employee",
                TablePolicy::user_scoped("id", ColumnSet::only(["id", "first_name"])),
            )
            .table("hr", "department", TablePolicy::global(ColumnSet::All))
            .build()
            .unwrap()
    }

    fn table<'p>(policy: &'p AccessPolicy, name: &str, alias: &str) -> Source<'p> {
        Source {
            qualifier: Some(Ident::new(alias)),
            kind: SourceKind::Table(policy.resolve_table(None, name).unwrap()),
        }
    }

    #[test]
    fn restricted_table_hides_unlisted_columns() {
        let policy = policy();
        let scope = Scope {
            sources: vec![table(&policy, "employee", "e")],
            parent: None,
        };
        scope.resolve_column(&Ident::new("first_name")).unwrap();
        let err = scope.resolve_column(&Ident::new("salary")).unwrap_err();
        assert!(matches!(err, ValidationError::AccessDenied(_)));
    }

    #[test]
    fn open_source_next_to_hidden_column_is_ambiguous() {
        let policy = policy();
        let scope = Scope {
            sources: vec![table(&policy, "employee", "e"), table(&policy, "department", "d")],
            parent: None,
        };
        let err = scope.resolve_column(&Ident::new("salary")).unwrap_err();
        let ValidationError::AmbiguousColumn { candidates, .. } = err else {
            panic!("expected ambiguity, got {err:?}");
        };
        assert_eq!(candidates, vec!["hr.department", "hr.employee"]);
        scope.resolve_column(&Ident::new("first_name")).unwrap();
    }

    #[test]
    fn correlated_references_reach_the_parent_scope() {
        let policy = policy();
        let outer = Scope {
            sources: vec![table(&policy, "employee", "e")],
            parent: None,
        };
        let inner = Scope {
            sources: vec![Source {
                qualifier: Some(Ident::new("x")),
                kind: SourceKind::Relation(Some(vec!["n".into()])),
            }],
            parent: Some(&outer),
        };
        inner.resolve_column(&Ident::new("first_name")).unwrap();
        assert!(inner.find_qualifier(&Ident::new("E")).is_some());
        assert!(!inner.locate_column(&Ident::new("nothing")).is_ok_and(|found| found));
    }

    #[test]
    fn open_inner_source_cannot_reach_a_column_hidden_outside() {
        let policy = policy();
        let outer = Scope {
            sources: vec![table(&policy, "employee", "e")],
            parent: None,
        };
        let inner = Scope {
            sources: vec![table(&policy, "department", "d")],
            parent: Some(&outer),
        };
        let err = inner.resolve_column(&Ident::new("salary")).unwrap_err();
        let ValidationError::AmbiguousColumn { candidates, .. } = err else {
            panic!("expected ambiguity, got {err:?}");
        };
        assert_eq!(candidates, vec!["hr.department", "hr.employee"]);
        inner.resolve_column(&Ident::new("first_name")).unwrap();
        inner.resolve_column(&Ident::new("budget")).unwrap();
    }

    #[test]
    fn two_definite_sources_are_ambiguous() {
        let policy = policy();
        let scope = Scope {
            sources: vec![table(&policy, "employee", "a"), table(&policy, "employee", "b")],
            parent: None,
        };
        assert!(matches!(
            scope.resolve_column(&Ident::new("id")),
            Err(ValidationError::AmbiguousColumn { .. })
        ));
    }
}
