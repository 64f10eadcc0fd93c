mod support;

use sqlwarden::rewriter::audit::audit_user_scope;
use sqlwarden::rewriter::predicate::ScopingRules;
use sqlwarden::{UserId, ValidationError};
use support::{employees_policy, parse_statement, rewrite};

fn audit(sql: &str) -> Result<(), ValidationError> {
    let policy = employees_policy();
    audit_user_scope(&parse_statement(sql), &ScopingRules::new(&policy, UserId::Int(456)))
}

#[test]
fn validator_output_always_passes_the_audit() {
    for sql in [
        "SELECT e.first_name FROM employee AS e WHERE e.id = 10001 OR e.first_name = 'Georgi'",
        "SELECT sub.id FROM (SELECT id FROM employee) AS sub",
        "SELECT id FROM employee UNION SELECT employee_id FROM salary",
        "SELECT d.id FROM department AS d WHERE EXISTS \
         (SELECT 1 FROM department_employee AS de WHERE de.department_id = d.id)",
    ] {
        audit(&rewrite(sql)).unwrap_or_else(|e| panic!("audit of `{sql}` failed: {e}"));
    }
}

#[test]
fn predicate_hidden_in_an_or_branch_fails() {
    match audit("SELECT e.id FROM employee AS e WHERE e.first_name = 'x' OR e.id = 456") {
        Err(ValidationError::AuditFailed { table, expected }) => {
            assert_eq!(table, "employees.employee");
            assert_eq!(expected, "e.id = 456");
        }
        other => panic!("expected audit failure, got {other:?}"),
    }
}

#[test]
fn text_that_merely_contains_the_predicate_fails() {
    assert!(audit("SELECT e.id FROM employee AS e WHERE e.first_name = 'e.id = 456'").is_err());
    assert!(audit("SELECT e.id FROM employee AS e WHERE (e.id = 456 OR true)").is_err());
}

#[test]
fn every_targeted_select_is_audited() {
    assert!(audit(
        "SELECT e.id FROM employee AS e WHERE e.id = 456 \
         UNION SELECT s.employee_id FROM salary AS s"
    )
    .is_err());
    assert!(audit(
        "SELECT e.id FROM employee AS e WHERE e.id = 456 AND e.id IN \
         (SELECT s.employee_id FROM salary AS s WHERE s.amount > 0)"
    )
    .is_err());
}

#[test]
fn predicate_for_another_user_fails() {
    assert!(audit("SELECT e.id FROM employee AS e WHERE e.id = 457").is_err());
    assert!(audit("SELECT e.id FROM employee AS e WHERE e.id = '456'").is_err());
}
