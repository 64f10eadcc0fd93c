mod support;

use sqlwarden::{AccessPolicy, ErrorKind, ValidationError, Validator};
use support::{rewrite, validate};

#[test]
fn allowlisted_functions_pass_in_every_clause() {
    let sql = rewrite(
        "SELECT upper(e.first_name), count(*) FROM employee AS e \
         WHERE lower(e.last_name) LIKE 'f%' GROUP BY e.first_name \
         HAVING count(*) > 1 ORDER BY count(*) DESC",
    );
    assert!(sql.contains("count(*)"), "unexpected rewrite: {sql}");
}

#[test]
fn unknown_function_is_refused_with_its_name() {
    match validate("SELECT my_udf(id) FROM employee") {
        Err(ValidationError::UnsafeFunction(name)) => assert_eq!(name, "my_udf"),
        other => panic!("expected unsafe function, got {other:?}"),
    }
}

#[test]
fn matching_is_case_insensitive() {
    assert_eq!(
        validate("SELECT PG_SLEEP(1)").unwrap_err().kind(),
        ErrorKind::UnsafeFunction
    );
    assert!(validate("SELECT UPPER(first_name) FROM employee").is_ok());
}

#[test]
fn schema_qualified_user_function_is_refused() {
    assert_eq!(
        validate("SELECT public.lower(first_name) FROM employee")
            .unwrap_err()
            .kind(),
        ErrorKind::UnsafeFunction
    );
}

#[test]
fn table_functions_go_through_the_same_gate() {
    assert_eq!(
        validate("SELECT * FROM generate_series(1, 10) AS g")
            .unwrap_err()
            .kind(),
        ErrorKind::UnsafeFunction
    );
}

#[test]
fn denylist_policy_still_refuses_the_dangerous_baseline() {
    let policy = AccessPolicy::from_json(
        r#"{
            "functions": {"deny": ["my_udf"]},
            "schemas": {"hr": {"department": {"scope": "global", "columns": "*"}}}
        }"#,
    )
    .unwrap();
    let validator = Validator::new(policy);

    assert!(validator
        .validate_sql("SELECT * FROM generate_series(1, 10) AS g", 1)
        .is_ok());
    for sql in ["SELECT my_udf(1)", "SELECT pg_terminate_backend(1)", "SELECT dblink('x', 'y')"] {
        assert_eq!(
            validator.validate_sql(sql, 1).unwrap_err().kind(),
            ErrorKind::UnsafeFunction,
            "`{sql}` should be refused"
        );
    }
}
