use std::ops::ControlFlow;

use sqlparser::ast::{
    Cte, Distinct, Expr, GroupByExpr, Ident, Join, JoinConstraint, JoinOperator, LimitClause,
    OrderByExpr, OrderByKind, Query, Select, SelectItem, SelectItemQualifiedWildcardKind, SetExpr,
    Statement, TableAlias, TableFactor, TableWithJoins, Visit, Visitor, WildcardAdditionalOptions,
};
use tracing::debug;

use crate::enforcer::scope::{ColumnMatch, Scope, Source, SourceKind};
use crate::error::{finish, flow, ValidationError};
use crate::parser::expr::{children, function_arg_expr, implicit_output_name, Child};
use crate::parser::names::{ident_key, split_table_name, terminal_ident};
use crate::policy::{AccessPolicy, ColumnSet};

/// A CTE name visible at some point of the query, with its output columns.
#[derive(Debug, Clone)]
struct CteDef {
    name: String,
    columns: Option<Vec<String>>,
}

/// Reject CTEs whose names collide with a policy table.
///
/// With this guard a single-part table name is a CTE reference exactly when no
/// policy table carries that name, so later stages can tell the two apart by
/// name alone.
pub fn check_cte_names(statement: &Statement, policy: &AccessPolicy) -> Result<(), ValidationError> {
    struct CteNames<'p>(&'p AccessPolicy);

    impl Visitor for CteNames<'_> {
        type Break = ValidationError;

        fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
            let Some(with) = &query.with else {
                return ControlFlow::Continue(());
            };
            flow(with.cte_tables.iter().try_for_each(|cte| {
                let name = ident_key(&cte.alias.name);
                if self.0.has_table_named(&name) {
                    Err(ValidationError::denied_table(name))
                } else {
                    Ok(())
                }
            }))
        }
    }

    finish(statement.visit(&mut CteNames(policy)))
}

/// Check every table and column reference of a query statement against the policy.
///
/// The walk is global: subqueries, derived tables, CTE bodies and both sides
/// of set operations are all checked.
pub fn check_access(statement: &Statement, policy: &AccessPolicy) -> Result<(), ValidationError> {
    match statement {
        Statement::Query(query) => {
            let checker = AccessChecker { policy };
            checker.check_query(query, &[], None).map(|_| ())
        }
        other => Err(ValidationError::DisallowedStatement(other.to_string())),
    }
}

struct AccessChecker<'p> {
    policy: &'p AccessPolicy,
}

impl<'p> AccessChecker<'p> {
    /// Check a query and return its output column names when known.
    fn check_query(
        &self,
        query: &Query,
        ctes: &[CteDef],
        parent: Option<&Scope<'_, 'p>>,
    ) -> Result<Option<Vec<String>>, ValidationError> {
        if query.for_clause.is_some()
            || query.settings.is_some()
            || query.format_clause.is_some()
            || !query.pipe_operators.is_empty()
        {
            return Err(ValidationError::unsupported("vendor-specific query clause"));
        }

        let mut visible = ctes.to_vec();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let def = self.check_cte(cte, with.recursive, &visible, parent)?;
                visible.push(def);
            }
        }

        let order_by = match &query.order_by {
            Some(order_by) => match &order_by.kind {
                OrderByKind::Expressions(exprs) => exprs.as_slice(),
                OrderByKind::All(_) => &[],
            },
            None => &[],
        };

        let columns = match query.body.as_ref() {
            SetExpr::Select(select) => self.check_select(select, &visible, parent, order_by)?,
            body => {
                let columns = self.check_set_expr(body, &visible, parent)?;
                check_output_order_by(order_by, columns.as_deref())?;
                columns
            }
        };

        let bounds = Scope::empty(parent);
        match &query.limit_clause {
            None => {}
            Some(LimitClause::LimitOffset {
                limit,
                offset,
                limit_by,
            }) => {
                for expr in limit.iter().chain(offset.iter().map(|o| &o.value)) {
                    self.check_expr(expr, &bounds, &visible)?;
                }
                if !limit_by.is_empty() {
                    return Err(ValidationError::unsupported("LIMIT BY"));
                }
            }
            Some(LimitClause::OffsetCommaLimit { offset, limit }) => {
                self.check_expr(offset, &bounds, &visible)?;
                self.check_expr(limit, &bounds, &visible)?;
            }
        }
        if let Some(quantity) = query.fetch.as_ref().and_then(|f| f.quantity.as_ref()) {
            self.check_expr(quantity, &bounds, &visible)?;
        }

        Ok(columns)
    }

    fn check_cte(
        &self,
        cte: &Cte,
        recursive: bool,
        visible: &[CteDef],
        parent: Option<&Scope<'_, 'p>>,
    ) -> Result<CteDef, ValidationError> {
        let name = ident_key(&cte.alias.name);
        let declared = alias_columns(&cte.alias);
        debug!(cte = %name, recursive, "checking CTE");

        let columns = if recursive {
            let mut with_self = visible.to_vec();
            with_self.push(CteDef {
                name: name.clone(),
                columns: declared.clone(),
            });
            self.check_query(&cte.query, &with_self, parent)?
        } else {
            self.check_query(&cte.query, visible, parent)?
        };

        Ok(CteDef {
            name,
            columns: declared.or(columns),
        })
    }

    fn check_set_expr(
        &self,
        body: &SetExpr,
        ctes: &[CteDef],
        parent: Option<&Scope<'_, 'p>>,
    ) -> Result<Option<Vec<String>>, ValidationError> {
        match body {
            SetExpr::Select(select) => self.check_select(select, ctes, parent, &[]),
            SetExpr::Query(query) => self.check_query(query, ctes, parent),
            SetExpr::SetOperation { left, right, .. } => {
                let columns = self.check_set_expr(left, ctes, parent)?;
                self.check_set_expr(right, ctes, parent)?;
                Ok(columns)
            }
            SetExpr::Values(values) => {
                let scope = Scope::empty(parent);
                for row in &values.rows {
                    for expr in row {
                        self.check_expr(expr, &scope, ctes)?;
                    }
                }
                let width = values.rows.first().map_or(0, Vec::len);
                Ok(Some((1..=width).map(|i| format!("column{i}")).collect()))
            }
            other => Err(ValidationError::DisallowedStatement(other.to_string())),
        }
    }

    fn check_select(
        &self,
        select: &Select,
        ctes: &[CteDef],
        parent: Option<&Scope<'_, 'p>>,
        order_by: &[OrderByExpr],
    ) -> Result<Option<Vec<String>>, ValidationError> {
        if select.top.is_some()
            || !select.lateral_views.is_empty()
            || select.prewhere.is_some()
            || !select.cluster_by.is_empty()
            || !select.distribute_by.is_empty()
            || !select.sort_by.is_empty()
            || !select.named_window.is_empty()
            || select.connect_by.is_some()
            || select.value_table_mode.is_some()
        {
            return Err(ValidationError::unsupported("vendor-specific SELECT clause"));
        }

        let mut scope = Scope::empty(parent);
        let mut constraints = Vec::new();
        for table in &select.from {
            self.add_table_with_joins(table, ctes, &mut scope, &mut constraints)?;
        }
        for (constraint, joined) in constraints {
            self.check_join_constraint(constraint, joined, &scope, ctes)?;
        }

        if let Some(Distinct::On(exprs)) = &select.distinct {
            for expr in exprs {
                self.check_expr(expr, &scope, ctes)?;
            }
        }

        let columns = self.check_projection(&select.projection, &scope, ctes)?;
        let output_names: Vec<String> = select
            .projection
            .iter()
            .filter_map(projection_name)
            .collect();

        for expr in select.selection.iter().chain(&select.having).chain(&select.qualify) {
            self.check_expr(expr, &scope, ctes)?;
        }

        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                match expr {
                    Expr::Identifier(ident) => {
                        let found = scope.locate_column(ident)?;
                        if !found && !output_names.contains(&ident_key(ident)) {
                            return Err(ValidationError::denied_column(None, ident.value.clone()));
                        }
                    }
                    other => self.check_expr(other, &scope, ctes)?,
                }
            }
        }

        for item in order_by {
            match &item.expr {
                Expr::Identifier(ident) if output_names.contains(&ident_key(ident)) => {}
                other => self.check_expr(other, &scope, ctes)?,
            }
        }

        Ok(columns)
    }

    fn add_table_with_joins<'q>(
        &self,
        table: &'q TableWithJoins,
        ctes: &[CteDef],
        scope: &mut Scope<'_, 'p>,
        constraints: &mut Vec<(&'q JoinConstraint, usize)>,
    ) -> Result<(), ValidationError> {
        self.add_relation(&table.relation, ctes, scope, constraints)?;
        for join in &table.joins {
            let constraint = join_constraint(join)?;
            self.add_relation(&join.relation, ctes, scope, constraints)?;
            if let Some(constraint) = constraint {
                constraints.push((constraint, scope.sources.len()));
            }
        }
        Ok(())
    }

    fn add_relation<'q>(
        &self,
        factor: &'q TableFactor,
        ctes: &[CteDef],
        scope: &mut Scope<'_, 'p>,
        constraints: &mut Vec<(&'q JoinConstraint, usize)>,
    ) -> Result<(), ValidationError> {
        let source = match factor {
            TableFactor::Table {
                name,
                alias,
                args: Some(args),
                ..
            } => {
                let lateral = scope.clone();
                for arg in &args.args {
                    match function_arg_expr(arg) {
                        Some(expr) => self.check_expr(expr, &lateral, ctes)?,
                        None => {
                            return Err(ValidationError::unsupported(format!(
                                "argument `{arg}` of table function `{name}`"
                            )));
                        }
                    }
                }
                Source {
                    qualifier: Some(match alias {
                        Some(alias) => alias.name.clone(),
                        None => terminal_ident(name)?,
                    }),
                    kind: SourceKind::Relation(alias.as_ref().and_then(alias_columns)),
                }
            }
            TableFactor::Table {
                name,
                alias,
                with_hints,
                version,
                ..
            } => {
                if !with_hints.is_empty() || version.is_some() {
                    return Err(ValidationError::unsupported(format!(
                        "table hints on `{name}`"
                    )));
                }
                let qualifier = match alias {
                    Some(alias) if !alias.columns.is_empty() => {
                        return Err(ValidationError::unsupported(format!(
                            "column aliases on table `{name}`"
                        )));
                    }
                    Some(alias) => alias.name.clone(),
                    None => terminal_ident(name)?,
                };
                let (schema, table) = split_table_name(name)?;
                let cte = schema
                    .is_none()
                    .then(|| ctes.iter().rev().find(|cte| cte.name == table))
                    .flatten();
                let kind = match cte {
                    Some(cte) => SourceKind::Relation(cte.columns.clone()),
                    None => SourceKind::Table(
                        self.policy
                            .resolve_table(schema.as_deref(), &table)
                            .ok_or_else(|| ValidationError::denied_table(name.to_string()))?,
                    ),
                };
                Source {
                    qualifier: Some(qualifier),
                    kind,
                }
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
                ..
            } => {
                let columns = if *lateral {
                    let lateral_scope = scope.clone();
                    self.check_query(subquery, ctes, Some(&lateral_scope))?
                } else {
                    self.check_query(subquery, ctes, scope.parent)?
                };
                Source {
                    qualifier: alias.as_ref().map(|a| a.name.clone()),
                    kind: SourceKind::Relation(
                        alias.as_ref().and_then(alias_columns).or(columns),
                    ),
                }
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias: None,
            } => return self.add_table_with_joins(table_with_joins, ctes, scope, constraints),
            other => {
                return Err(ValidationError::unsupported(format!("table source `{other}`")));
            }
        };
        scope.sources.push(source);
        Ok(())
    }

    fn check_join_constraint(
        &self,
        constraint: &JoinConstraint,
        joined: usize,
        scope: &Scope<'_, 'p>,
        ctes: &[CteDef],
    ) -> Result<(), ValidationError> {
        match constraint {
            JoinConstraint::On(expr) => self.check_expr(expr, scope, ctes),
            JoinConstraint::Using(columns) => {
                let left = Scope {
                    sources: scope.sources[..joined - 1].to_vec(),
                    parent: None,
                };
                let right = Scope {
                    sources: scope.sources[joined - 1..joined].to_vec(),
                    parent: None,
                };
                for column in columns {
                    let column = terminal_ident(column)?;
                    left.resolve_column(&column)?;
                    right.resolve_column(&column)?;
                }
                Ok(())
            }
            JoinConstraint::None => Ok(()),
            JoinConstraint::Natural => Err(ValidationError::unsupported("NATURAL JOIN")),
        }
    }

    fn check_projection(
        &self,
        projection: &[SelectItem],
        scope: &Scope<'_, 'p>,
        ctes: &[CteDef],
    ) -> Result<Option<Vec<String>>, ValidationError> {
        let mut columns = Some(Vec::new());
        for item in projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    self.check_expr(expr, scope, ctes)?;
                    push_known(&mut columns, projection_name(item));
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    self.check_expr(expr, scope, ctes)?;
                    push_known(&mut columns, Some(ident_key(alias)));
                }
                SelectItem::Wildcard(options) => {
                    check_wildcard_options(options)?;
                    for source in &scope.sources {
                        check_wildcard_source(source)?;
                        extend_known(&mut columns, source.wildcard_columns());
                    }
                }
                SelectItem::QualifiedWildcard(
                    SelectItemQualifiedWildcardKind::ObjectName(name),
                    options,
                ) => {
                    check_wildcard_options(options)?;
                    let qualifier = terminal_ident(name)?;
                    let source = scope
                        .sources
                        .iter()
                        .find(|s| s.qualifier_key() == Some(ident_key(&qualifier)))
                        .ok_or_else(|| {
                            ValidationError::denied_column(Some(name.to_string()), "*")
                        })?;
                    check_wildcard_source(source)?;
                    extend_known(&mut columns, source.wildcard_columns());
                }
                other => {
                    return Err(ValidationError::unsupported(format!("select item `{other}`")));
                }
            }
        }
        Ok(columns)
    }

    fn check_expr(
        &self,
        expr: &Expr,
        scope: &Scope<'_, 'p>,
        ctes: &[CteDef],
    ) -> Result<(), ValidationError> {
        match expr {
            Expr::Identifier(ident) => scope.resolve_column(ident),
            Expr::CompoundIdentifier(parts) => check_qualified_column(parts, scope),
            other => {
                for child in children(other)? {
                    match child {
                        Child::Expr(expr) => self.check_expr(expr, scope, ctes)?,
                        Child::Query(query) => {
                            self.check_query(query, ctes, Some(scope))?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_qualified_column(parts: &[Ident], scope: &Scope<'_, '_>) -> Result<(), ValidationError> {
    let (schema, qualifier, column) = match parts {
        [qualifier, column] => (None, qualifier, column),
        [schema, qualifier, column] => (Some(ident_key(schema)), qualifier, column),
        _ => {
            return Err(ValidationError::unsupported(format!(
                "column reference `{}`",
                Expr::CompoundIdentifier(parts.to_vec())
            )));
        }
    };

    let source = scope
        .find_qualifier(qualifier)
        .filter(|source| match (&schema, &source.kind) {
            (None, _) => true,
            (Some(schema), SourceKind::Table(table)) => table.schema == schema,
            (Some(_), SourceKind::Relation(_)) => false,
        })
        .ok_or_else(|| {
            ValidationError::denied_column(Some(qualifier.value.clone()), column.value.clone())
        })?;

    match source.column_match(&ident_key(column)) {
        ColumnMatch::Definite | ColumnMatch::Possible => Ok(()),
        ColumnMatch::Hidden | ColumnMatch::Absent => Err(ValidationError::denied_column(
            Some(source.label()),
            column.value.clone(),
        )),
    }
}

/// A restricted table must never be read through a wildcard; expansion
/// replaces those before this check runs.
fn check_wildcard_source(source: &Source<'_>) -> Result<(), ValidationError> {
    match &source.kind {
        SourceKind::Table(table) if matches!(table.policy.columns, ColumnSet::Only(_)) => {
            Err(ValidationError::denied_column(Some(table.qualified_name()), "*"))
        }
        _ => Ok(()),
    }
}

fn check_wildcard_options(options: &WildcardAdditionalOptions) -> Result<(), ValidationError> {
    if *options == WildcardAdditionalOptions::default() {
        Ok(())
    } else {
        Err(ValidationError::unsupported(format!("wildcard options `{options}`")))
    }
}

/// ORDER BY of a set operation or parenthesized query may only name output
/// columns or positions.
fn check_output_order_by(
    order_by: &[OrderByExpr],
    columns: Option<&[String]>,
) -> Result<(), ValidationError> {
    for item in order_by {
        match &item.expr {
            Expr::Value(_) => {}
            Expr::Identifier(ident)
                if columns.is_none_or(|cols| cols.contains(&ident_key(ident))) => {}
            other => {
                return Err(ValidationError::unsupported(format!(
                    "ORDER BY `{other}` over a set operation"
                )));
            }
        }
    }
    Ok(())
}

fn join_constraint(join: &Join) -> Result<Option<&JoinConstraint>, ValidationError> {
    match &join.join_operator {
        JoinOperator::Join(constraint)
        | JoinOperator::Inner(constraint)
        | JoinOperator::Left(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::Right(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint) => Ok(Some(constraint)),
        JoinOperator::CrossJoin { .. } => Ok(None),
        other => Err(ValidationError::unsupported(format!("join `{other:?}`"))),
    }
}

fn alias_columns(alias: &TableAlias) -> Option<Vec<String>> {
    if alias.columns.is_empty() {
        None
    } else {
        Some(alias.columns.iter().map(|c| ident_key(&c.name)).collect())
    }
}

fn projection_name(item: &SelectItem) -> Option<String> {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => Some(ident_key(alias)),
        SelectItem::UnnamedExpr(expr) => implicit_output_name(expr).map(ident_key),
        _ => None,
    }
}

fn push_known(columns: &mut Option<Vec<String>>, name: Option<String>) {
    if let Some(list) = columns {
        list.push(name.unwrap_or_else(|| "?column?".to_string()));
    }
}

fn extend_known(columns: &mut Option<Vec<String>>, names: Option<Vec<String>>) {
    match (columns.as_mut(), names) {
        (Some(list), Some(names)) => list.extend(names),
        _ => *columns = None,
    }
}
