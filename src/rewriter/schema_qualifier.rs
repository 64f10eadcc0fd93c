use std::convert::Infallible;
use std::ops::ControlFlow;

use sqlparser::ast::{ObjectName, Statement, TableFactor, VisitMut, VisitorMut};

use crate::parser::names::{ident_key, object_name_idents, policy_ident};
use crate::policy::AccessPolicy;

/// Qualify unqualified policy tables with the policy's default schema.
///
/// Names that do not resolve to a policy table in the default schema (CTE
/// references among them) are left alone, as are table functions.
pub fn qualify_tables(statement: &mut Statement, policy: &AccessPolicy) -> usize {
    let Some(schema) = policy.default_schema() else {
        return 0;
    };
    let mut qualifier = SchemaQualifier {
        policy,
        schema,
        qualified: 0,
    };
    match statement.visit(&mut qualifier) {
        ControlFlow::Continue(()) => qualifier.qualified,
        ControlFlow::Break(never) => match never {},
    }
}

struct SchemaQualifier<'p> {
    policy: &'p AccessPolicy,
    schema: &'p str,
    qualified: usize,
}

impl VisitorMut for SchemaQualifier<'_> {
    type Break = Infallible;

    fn pre_visit_table_factor(&mut self, factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Table {
            name, args: None, ..
        } = factor
        {
            let table = match object_name_idents(name).ok().as_deref() {
                Some([table]) => (*table).clone(),
                _ => return ControlFlow::Continue(()),
            };
            if self
                .policy
                .resolve_table(Some(self.schema), &ident_key(&table))
                .is_some()
            {
                *name = ObjectName::from(vec![policy_ident(self.schema), table]);
                self.qualified += 1;
            }
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dialect::SqlDialect;
    use crate::parser::sql_parser::{parse_single_statement, SyntaxTree};
    use crate::policy::{ColumnSet, TablePolicy};

    #[test]
    fn unqualified_policy_tables_get_the_default_schema() {
        let policy = AccessPolicy::builder()
            .default_schema("hr")
            .table("hr", "employee", TablePolicy::global(ColumnSet::All))
            .build()
            .unwrap();
        let SyntaxTree::Statement(mut statement) = parse_single_statement(
            "WITH mine AS (SELECT id FROM employee) SELECT m.id FROM mine AS m, hr.employee AS e",
            SqlDialect::Postgres,
        )
        .unwrap() else {
            panic!("expected statement");
        };
        assert_eq!(qualify_tables(&mut statement, &policy), 1);
        assert_eq!(
            statement.to_string(),
            "WITH mine AS (SELECT id FROM hr.employee) SELECT m.id FROM mine AS m, hr.employee AS e"
        );
    }
}
