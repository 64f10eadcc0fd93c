use std::ops::ControlFlow;

use sqlparser::ast::{Expr, ObjectName, Statement, TableFactor, Visit, Visitor};
use tracing::debug;

use crate::error::{finish, flow, ValidationError};
use crate::parser::names::split_function_name;
use crate::policy::FunctionPolicy;

/// Check every function call, including table functions in FROM, against the
/// function policy. Matching is case-insensitive.
pub fn check_functions(statement: &Statement, functions: &FunctionPolicy) -> Result<(), ValidationError> {
    finish(statement.visit(&mut FunctionGate { functions }))
}

struct FunctionGate<'p> {
    functions: &'p FunctionPolicy,
}

impl FunctionGate<'_> {
    fn check_name(&self, name: &ObjectName) -> Result<(), ValidationError> {
        let (schema, function) = split_function_name(name)?;
        if self.functions.permits(schema.as_deref(), &function) {
            Ok(())
        } else {
            debug!(function = %name, "function refused by policy");
            Err(ValidationError::UnsafeFunction(name.to_string()))
        }
    }
}

impl Visitor for FunctionGate<'_> {
    type Break = ValidationError;

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Function(function) => flow(self.check_name(&function.name)),
            _ => ControlFlow::Continue(()),
        }
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            } => flow(self.check_name(name)),
            _ => ControlFlow::Continue(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dialect::SqlDialect;
    use crate::parser::sql_parser::{parse_single_statement, SyntaxTree};

    fn check(sql: &str, functions: &FunctionPolicy) -> Result<(), ValidationError> {
        let SyntaxTree::Statement(statement) =
            parse_single_statement(sql, SqlDialect::Postgres).unwrap()
        else {
            panic!("expected statement");
        };
        check_functions(&statement, functions)
    }

    #[test]
    fn nested_calls_are_checked() {
        let functions = FunctionPolicy::default();
        check("SELECT upper(lower(first_name)), count(*) FROM employee", &functions).unwrap();
        let err = check(
            "SELECT id FROM employee WHERE length(first_name) > (SELECT PG_SLEEP(5))",
            &functions,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnsafeFunction(name) if name == "PG_SLEEP"));
    }

    #[test]
    fn table_functions_are_checked() {
        let err = check(
            "SELECT * FROM pg_read_file('/etc/passwd') AS f",
            &FunctionPolicy::deny(Vec::<String>::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnsafeFunction(_)));
    }

    #[test]
    fn denylist_is_case_insensitive() {
        let functions = FunctionPolicy::deny(["my_udf"]);
        assert!(check("SELECT My_Udf(1)", &functions).is_err());
        check("SELECT some_other_udf(1)", &functions).unwrap();
    }
}
