use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use tracing::{debug, info, warn};

use crate::classifier::read_only::check_read_only;
use crate::classifier::statement_classifier::{classify, StatementKind};
use crate::enforcer::access::{check_access, check_cte_names};
use crate::enforcer::functions::check_functions;
use crate::enforcer::limit::{enforce_limit, RowLimit};
use crate::enforcer::star::expand_wildcards;
use crate::error::ValidationError;
use crate::output::masker::cache_key;
use crate::output::serializer::render;
use crate::parser::sql_parser::{parse_single_statement, SyntaxTree};
use crate::policy::AccessPolicy;
use crate::rewriter::audit::audit_user_scope;
use crate::rewriter::injector::inject_user_scope;
use crate::rewriter::predicate::{ScopingRules, UserId};
use crate::rewriter::schema_qualifier::qualify_tables;

/// Per-request switches on top of the policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Skip user-scope injection and its audit entirely.
    pub skip_user_filter: bool,
    /// Tables (`table` or `schema.table`) that get no user-scope predicate.
    pub skip_user_filter_tables: Vec<String>,
    /// Identity injected instead of the request's user.
    pub override_user_id: Option<UserId>,
    /// Default row limit for this request, clamped to the policy maximum.
    pub limit: Option<u64>,
    /// Also scope global tables that declare a user key.
    pub enforce_on_global_tables: bool,
}

/// One query to validate, for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    /// Untrusted SQL text.
    pub sql: String,
    /// Identity the query runs for.
    pub user: UserId,
    /// Per-request switches.
    pub options: ValidationOptions,
}

impl ValidationRequest {
    /// Request with default options.
    pub fn new(sql: impl Into<String>, user: impl Into<UserId>) -> Self {
        Self {
            sql: sql.into(),
            user: user.into(),
            options: ValidationOptions::default(),
        }
    }

    /// Replace the request options.
    #[must_use]
    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    fn effective_user(&self) -> &UserId {
        self.options.override_user_id.as_ref().unwrap_or(&self.user)
    }
}

/// A query that passed every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedQuery {
    /// Rewritten SQL; the only text an executor may run or a cache may store.
    pub sql: String,
    /// `sql` with every literal masked.
    pub cache_key: String,
    /// Root shape of the statement.
    pub kind: StatementKind,
    /// User-scoped tables that received a predicate, as `schema.table`.
    pub scoped_tables: BTreeSet<String>,
    /// Row limit applied to the outermost query.
    pub limit: u64,
}

/// Runs the validation pipeline against a shared, immutable policy.
///
/// Cloning is cheap; clones share the policy.
#[derive(Debug, Clone)]
pub struct Validator {
    policy: Arc<AccessPolicy>,
}

impl From<Arc<AccessPolicy>> for Validator {
    fn from(policy: Arc<AccessPolicy>) -> Self {
        Self { policy }
    }
}

impl Validator {
    /// Wrap a policy for sharing across requests.
    pub fn new(policy: AccessPolicy) -> Self {
        Self::from(Arc::new(policy))
    }

    /// The policy every request is checked against.
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Validate `sql` for `user` with default options.
    pub fn validate_sql(
        &self,
        sql: &str,
        user: impl Into<UserId>,
    ) -> Result<ValidatedQuery, ValidationError> {
        self.validate(&ValidationRequest::new(sql, user))
    }

    /// Parse, check, rewrite, audit and render one request.
    ///
    /// All or nothing: any stage failing rejects the whole request.
    pub fn validate(&self, request: &ValidationRequest) -> Result<ValidatedQuery, ValidationError> {
        match self.run(request) {
            Ok(validated) => {
                info!(
                    kind = %validated.kind,
                    scoped_tables = ?validated.scoped_tables,
                    limit = validated.limit,
                    "query validated"
                );
                Ok(validated)
            }
            Err(err) => {
                warn!(kind = %err.kind(), error = %err, "query rejected");
                Err(err)
            }
        }
    }

    fn run(&self, request: &ValidationRequest) -> Result<ValidatedQuery, ValidationError> {
        let policy = self.policy.as_ref();
        let tree = parse_single_statement(&request.sql, policy.dialect())?;
        let kind = classify(&tree)?;
        let SyntaxTree::Statement(mut statement) = tree else {
            return Err(ValidationError::DisallowedStatement("opaque command".into()));
        };
        check_read_only(&statement)?;
        debug!(%kind, "statement classified");

        check_cte_names(&statement, policy)?;
        expand_wildcards(&mut statement, policy)?;
        check_access(&statement, policy)?;
        check_functions(&statement, policy.functions())?;
        debug!("access and function checks passed");

        let rules = self.scoping_rules(request);
        let scoped_tables = match &rules {
            Some(rules) => inject_user_scope(&mut statement, rules)?,
            None => BTreeSet::new(),
        };

        let default_limit = request.options.limit.unwrap_or(policy.default_limit());
        let limit = enforce_limit(&mut statement, RowLimit::new(default_limit, policy.max_limit()))?;
        let qualified = qualify_tables(&mut statement, policy);
        debug!(qualified, "default schema applied");

        if let Some(rules) = &rules {
            audit_user_scope(&statement, rules)?;
        }

        Ok(finish(statement, kind, scoped_tables, limit))
    }

    fn scoping_rules(&self, request: &ValidationRequest) -> Option<ScopingRules<'_>> {
        if request.options.skip_user_filter {
            return None;
        }
        let mut rules = ScopingRules::new(&self.policy, request.effective_user().clone());
        rules.include_global = request.options.enforce_on_global_tables;
        for table in &request.options.skip_user_filter_tables {
            rules = rules.skip_table(table);
        }
        Some(rules)
    }
}

fn finish(
    statement: Statement,
    kind: StatementKind,
    scoped_tables: BTreeSet<String>,
    limit: u64,
) -> ValidatedQuery {
    ValidatedQuery {
        sql: render(&statement),
        cache_key: cache_key(&statement),
        kind,
        scoped_tables,
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::policy::{ColumnSet, TablePolicy};

    fn validator() -> Validator {
        Validator::new(
            AccessPolicy::builder()
                .default_schema("hr")
                .table(
                    "hr",
                    "employee",
                    TablePolicy::user_scoped("id", ColumnSet::only(["id", "first_name"])),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn pipeline_rewrites_and_masks() {
        let validated = validator()
            .validate_sql("SELECT e.first_name FROM employee AS e WHERE e.id = 1", 456)
            .unwrap();
        assert_eq!(
            validated.sql,
            "SELECT e.first_name FROM hr.employee AS e WHERE e.id = 456 LIMIT 50"
        );
        assert_eq!(
            validated.cache_key,
            "SELECT e.first_name FROM hr.employee AS e WHERE e.id = ? LIMIT ?"
        );
        assert_eq!(validated.kind, StatementKind::Select);
        assert_eq!(validated.limit, 50);
        assert!(validated.scoped_tables.contains("hr.employee"));
    }

    #[test]
    fn override_user_wins_over_request_user() {
        let request = ValidationRequest::new("SELECT id FROM employee", 1).with_options(
            ValidationOptions {
                override_user_id: Some(UserId::Int(7)),
                limit: Some(5),
                ..ValidationOptions::default()
            },
        );
        let validated = validator().validate(&request).unwrap();
        assert_eq!(
            validated.sql,
            "SELECT id FROM hr.employee WHERE employee.id = 7 LIMIT 5"
        );
    }

    #[test]
    fn skipping_the_filter_leaves_where_untouched() {
        let request = ValidationRequest::new("SELECT id FROM employee WHERE id = 3", 1).with_options(
            ValidationOptions {
                skip_user_filter: true,
                ..ValidationOptions::default()
            },
        );
        let validated = validator().validate(&request).unwrap();
        assert_eq!(validated.sql, "SELECT id FROM hr.employee WHERE id = 3 LIMIT 50");
        assert!(validated.scoped_tables.is_empty());
    }

    #[test]
    fn rejections_carry_their_kind() {
        let err = validator()
            .validate_sql("DELETE FROM employee", 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisallowedStatement);
    }
}
