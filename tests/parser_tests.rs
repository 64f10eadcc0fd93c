use sqlwarden::parser::dialect::SqlDialect;
use sqlwarden::parser::sql_parser::{parse_single_statement, SyntaxTree};
use sqlwarden::ValidationError;

fn parse(sql: &str) -> Result<SyntaxTree, ValidationError> {
    parse_single_statement(sql, SqlDialect::Postgres)
}

#[test]
fn exactly_one_statement_is_accepted() {
    assert!(matches!(
        parse("SELECT 1;"),
        Ok(SyntaxTree::Statement(_))
    ));
    assert!(matches!(
        parse("SELECT 1; SELECT 2"),
        Err(ValidationError::MultipleStatements { count: 2 })
    ));
}

#[test]
fn blank_input_is_empty() {
    for sql in ["", "   ", ";", " ; ;", "-- only a comment"] {
        assert!(
            matches!(parse(sql), Err(ValidationError::EmptyInput)),
            "`{sql}` should be empty input"
        );
    }
}

#[test]
fn semicolons_in_literals_and_identifiers_do_not_split() {
    assert!(matches!(
        parse(r#"SELECT 'a;b' AS "x;y""#),
        Ok(SyntaxTree::Statement(_))
    ));
}

#[test]
fn broken_queries_are_parse_errors() {
    for sql in ["SELECT * FROM", "WITH x AS SELECT 1", "(SELECT 1", "SELECT 1 +"] {
        assert!(
            matches!(parse(sql), Err(ValidationError::Parse(_))),
            "`{sql}` should be a parse error"
        );
    }
}

#[test]
fn unparseable_commands_are_opaque() {
    match parse("DO $$ BEGIN PERFORM 1; END $$") {
        Ok(SyntaxTree::Opaque(command)) => assert_eq!(command.keyword, "DO"),
        other => panic!("expected opaque command, got {other:?}"),
    }
}

#[test]
fn dialects_parse_their_own_quoting() {
    assert!(matches!(
        parse_single_statement("SELECT `id` FROM `employee`", SqlDialect::MySql),
        Ok(SyntaxTree::Statement(_))
    ));
}
