#![allow(dead_code)]

use std::path::PathBuf;

use sqlparser::ast::Statement;
use sqlwarden::parser::sql_parser::{parse_single_statement, SyntaxTree};
use sqlwarden::{AccessPolicy, ValidatedQuery, ValidationError, ValidationOptions, ValidationRequest, Validator};

pub(crate) const USER: i64 = 456;

pub(crate) fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from("tests/fixtures").join(name)
}

pub(crate) fn employees_policy() -> AccessPolicy {
    AccessPolicy::from_path(&fixture_path("employees_manifest.json"))
        .expect("fixture manifest should load")
}

pub(crate) fn employees_validator() -> Validator {
    Validator::new(employees_policy())
}

pub(crate) fn parse_statement(sql: &str) -> Statement {
    match parse_single_statement(sql, employees_policy().dialect()).expect("SQL should parse") {
        SyntaxTree::Statement(statement) => statement,
        SyntaxTree::Opaque(command) => panic!("expected a structured statement, got {command}"),
    }
}

pub(crate) fn validate(sql: &str) -> Result<ValidatedQuery, ValidationError> {
    employees_validator().validate_sql(sql, USER)
}

pub(crate) fn validate_with(
    sql: &str,
    options: ValidationOptions,
) -> Result<ValidatedQuery, ValidationError> {
    employees_validator().validate(&ValidationRequest::new(sql, USER).with_options(options))
}

pub(crate) fn rewrite(sql: &str) -> String {
    validate(sql)
        .unwrap_or_else(|e| panic!("expected `{sql}` to validate, got: {e}"))
        .sql
}
