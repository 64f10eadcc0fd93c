use std::fmt;

use serde::Serialize;
use sqlparser::ast::{SetExpr, Statement};

use crate::error::ValidationError;
use crate::parser::sql_parser::SyntaxTree;

/// Root shapes allowed to continue through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// A single SELECT, possibly parenthesized or behind a WITH clause.
    Select,
    /// UNION / INTERSECT / EXCEPT of selects.
    SetOperation,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Select => f.write_str("select"),
            StatementKind::SetOperation => f.write_str("set_operation"),
        }
    }
}

/// Classify the root of a parsed statement.
///
/// Anything that is not a query whose body is a SELECT or a set operation is
/// rejected, opaque commands included.
pub fn classify(tree: &SyntaxTree) -> Result<StatementKind, ValidationError> {
    match tree {
        SyntaxTree::Opaque(command) => Err(ValidationError::DisallowedStatement(command.to_string())),
        SyntaxTree::Statement(Statement::Query(query)) => classify_body(&query.body),
        SyntaxTree::Statement(other) => Err(ValidationError::DisallowedStatement(format!(
            "{} statement",
            leading_word(&other.to_string())
        ))),
    }
}

fn classify_body(body: &SetExpr) -> Result<StatementKind, ValidationError> {
    match body {
        SetExpr::Select(_) => Ok(StatementKind::Select),
        SetExpr::SetOperation { .. } => Ok(StatementKind::SetOperation),
        SetExpr::Query(inner) => classify_body(&inner.body),
        other => Err(ValidationError::DisallowedStatement(format!(
            "{} query body",
            leading_word(&other.to_string())
        ))),
    }
}

fn leading_word(rendered: &str) -> String {
    rendered
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dialect::SqlDialect;
    use crate::parser::sql_parser::parse_single_statement;

    fn classify_sql(sql: &str) -> Result<StatementKind, ValidationError> {
        classify(&parse_single_statement(sql, SqlDialect::Postgres).unwrap())
    }

    #[test]
    fn parenthesized_select_is_still_a_select() {
        assert_eq!(classify_sql("(SELECT 1)").unwrap(), StatementKind::Select);
        assert_eq!(
            classify_sql("WITH x AS (SELECT 1) SELECT * FROM x").unwrap(),
            StatementKind::Select
        );
    }

    #[test]
    fn set_operations_are_recognized() {
        assert_eq!(
            classify_sql("SELECT 1 UNION ALL SELECT 2").unwrap(),
            StatementKind::SetOperation
        );
    }

    #[test]
    fn rejection_names_the_statement() {
        let err = classify_sql("TRUNCATE TABLE employee").unwrap_err();
        assert_eq!(
            err.to_string(),
            "only SELECT queries are allowed: TRUNCATE statement"
        );
        assert!(matches!(
            classify_sql("VALUES (1)"),
            Err(ValidationError::DisallowedStatement(_))
        ));
    }
}
