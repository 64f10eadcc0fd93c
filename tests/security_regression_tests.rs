mod support;

use sqlwarden::ErrorKind;
use support::{employees_validator, rewrite, validate};

fn rejection(sql: &str) -> ErrorKind {
    match validate(sql) {
        Ok(validated) => panic!("expected `{sql}` to be rejected, got `{}`", validated.sql),
        Err(e) => e.kind(),
    }
}

#[test]
fn scenario_a_or_bypass_cannot_widen_the_user_filter() {
    let sql = rewrite(
        "SELECT e.first_name FROM employee e WHERE e.id = 10001 OR e.first_name = 'Georgi'",
    );
    assert!(
        sql.contains("WHERE (e.first_name = 'Georgi') AND e.id = 456 LIMIT 50"),
        "unexpected rewrite: {sql}"
    );
    assert!(!sql.contains("10001"), "attacker id must be stripped: {sql}");
}

#[test]
fn scenario_b_truncate_is_disallowed() {
    assert_eq!(rejection("TRUNCATE TABLE employee"), ErrorKind::DisallowedStatement);
}

#[test]
fn scenario_c_explain_analyze_is_disallowed() {
    assert_eq!(
        rejection("EXPLAIN ANALYZE SELECT * FROM employee"),
        ErrorKind::DisallowedStatement
    );
}

#[test]
fn scenario_d_oversized_limit_is_clamped() {
    assert_eq!(
        rewrite("SELECT id FROM employee LIMIT 999999999"),
        "SELECT id FROM employees.employee WHERE employee.id = 456 LIMIT 1000"
    );
}

#[test]
fn scenario_e_only_the_select_listing_the_table_is_filtered() {
    let validated = employees_validator()
        .validate_sql("SELECT sub.id FROM (SELECT id FROM employee WHERE id = 123) AS sub", 123)
        .unwrap();
    assert_eq!(
        validated.sql,
        "SELECT sub.id FROM (SELECT id FROM employees.employee WHERE employee.id = 123) AS sub LIMIT 50"
    );
}

#[test]
fn scenario_f_stacked_statement_is_a_parse_error() {
    assert_eq!(
        rejection("SELECT id FROM employee; DROP TABLE employee"),
        ErrorKind::Parse
    );
}

#[test]
fn semicolons_inside_literals_are_not_statement_breaks() {
    let sql = rewrite("SELECT first_name FROM employee WHERE first_name = 'a; DROP TABLE employee'");
    assert_eq!(
        sql,
        "SELECT first_name FROM employees.employee \
         WHERE (first_name = 'a; DROP TABLE employee') AND employee.id = 456 LIMIT 50"
    );
}

#[test]
fn key_predicates_are_stripped_at_any_depth_and_operator() {
    for (sql, remainder) in [
        (
            "SELECT e.id FROM employee AS e WHERE e.first_name = 'x' AND (e.id = 1 OR e.id > 0)",
            Some("(e.first_name = 'x')"),
        ),
        (
            "SELECT e.id FROM employee AS e WHERE NOT e.id <> 456 OR e.gender = 'F'",
            Some("(e.gender = 'F')"),
        ),
        (
            "SELECT e.id FROM employee AS e WHERE e.id BETWEEN 1 AND 99999",
            None,
        ),
        (
            "SELECT e.id FROM employee AS e WHERE e.id IN (1, 2, 3) OR e.id IS NOT NULL",
            None,
        ),
        ("SELECT e.id FROM employee AS e WHERE CAST(e.id AS TEXT) LIKE '1%'", None),
        ("SELECT e.id FROM employee AS e WHERE 10001 = e.id", None),
    ] {
        let rewritten = rewrite(sql);
        let expected_where = match remainder {
            Some(rest) => format!("WHERE {rest} AND e.id = 456 LIMIT 50"),
            None => "WHERE e.id = 456 LIMIT 50".to_string(),
        };
        assert!(
            rewritten.ends_with(&expected_where),
            "`{sql}` rewrote to `{rewritten}`, expected suffix `{expected_where}`"
        );
    }
}

#[test]
fn validating_validated_output_is_a_fixed_point() {
    for sql in [
        "SELECT e.first_name FROM employee AS e WHERE e.id = 10001 OR e.first_name = 'Georgi'",
        "SELECT e.first_name, s.amount FROM employee AS e JOIN salary AS s ON s.employee_id = e.id",
        "SELECT sub.id FROM (SELECT id FROM employee WHERE id = 1) AS sub",
        "SELECT id FROM employee UNION SELECT employee_id FROM salary",
        "SELECT * FROM salary",
    ] {
        let once = rewrite(sql);
        let twice = rewrite(&once);
        assert_eq!(once, twice, "second validation of `{sql}` changed the query");
    }
}

#[test]
fn cte_cannot_shadow_a_policy_table() {
    assert_eq!(
        rejection("WITH employee AS (SELECT 1 AS id) SELECT id FROM employee"),
        ErrorKind::AccessDenied
    );
    assert_eq!(
        rejection("WITH x AS (SELECT 1), Salary AS (SELECT 2) SELECT 1"),
        ErrorKind::AccessDenied
    );
}

#[test]
fn cte_bodies_are_filtered_where_they_read_the_table() {
    assert_eq!(
        rewrite("WITH mine AS (SELECT id, first_name FROM employee) SELECT first_name FROM mine"),
        "WITH mine AS (SELECT id, first_name FROM employees.employee WHERE employee.id = 456) \
         SELECT first_name FROM mine LIMIT 50"
    );
}

#[test]
fn correlated_subqueries_get_their_own_filter() {
    assert_eq!(
        rewrite(
            "SELECT d.dept_name FROM department AS d WHERE EXISTS \
             (SELECT 1 FROM department_employee AS de WHERE de.department_id = d.id)"
        ),
        "SELECT d.dept_name FROM employees.department AS d WHERE EXISTS \
         (SELECT 1 FROM employees.department_employee AS de \
         WHERE (de.department_id = d.id) AND de.employee_id = 456) LIMIT 50"
    );
}

#[test]
fn write_lock_and_into_are_rejected_anywhere() {
    assert_eq!(
        rejection("SELECT id FROM employee FOR UPDATE"),
        ErrorKind::DisallowedStatement
    );
    assert_eq!(
        rejection("SELECT id INTO stolen FROM employee"),
        ErrorKind::DisallowedStatement
    );
    assert!(validate("WITH d AS (DELETE FROM employee RETURNING id) SELECT id FROM d").is_err());
}

#[test]
fn hidden_columns_are_denied() {
    assert_eq!(rejection("SELECT salary FROM employee"), ErrorKind::AccessDenied);
    assert_eq!(
        rejection(r#"SELECT "First_Name" FROM employee"#),
        ErrorKind::AccessDenied
    );
}

#[test]
fn dangerous_functions_are_refused() {
    assert_eq!(rejection("SELECT pg_sleep(10)"), ErrorKind::UnsafeFunction);
    assert_eq!(
        rejection("SELECT upper(pg_read_file('/etc/passwd'))"),
        ErrorKind::UnsafeFunction
    );
}
