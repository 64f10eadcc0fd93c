use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::PolicyError;
use crate::parser::dialect::SqlDialect;
use crate::policy::access_policy::{
    AccessPolicy, ColumnSet, FunctionPolicy, TablePolicy, TableScope, DEFAULT_LIMIT,
    DEFAULT_MAX_LIMIT,
};

/// On-disk shape of a policy manifest.
///
/// ```json
/// {
///   "dialect": "postgres",
///   "default_schema": "employees",
///   "default_limit": 50,
///   "max_limit": 1000,
///   "functions": { "deny": ["my_udf"] },
///   "schemas": {
///     "employees": {
///       "employee": { "scope": "user", "user_key": "id", "columns": ["id", "first_name"] },
///       "department": { "scope": "global", "columns": "*" }
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyManifest {
    /// Parsing dialect.
    #[serde(default)]
    pub dialect: SqlDialect,
    /// Schema for unqualified table names.
    #[serde(default)]
    pub default_schema: Option<String>,
    /// Limit injected when a query has none.
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    /// Hard cap for any query's limit.
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
    /// Function rules; the built-in allowlist when omitted.
    #[serde(default)]
    pub functions: Option<FunctionsManifest>,
    /// `schema -> table -> rules`.
    pub schemas: BTreeMap<String, BTreeMap<String, TableManifest>>,
}

/// Function section of a manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionsManifest {
    /// Only these functions may be called.
    Allow(Vec<String>),
    /// These functions (plus the dangerous baseline) may not be called.
    Deny(Vec<String>),
}

/// Per-table section of a manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableManifest {
    /// Row visibility.
    pub scope: TableScope,
    /// Scoping column; required for user-scoped tables.
    #[serde(default)]
    pub user_key: Option<String>,
    /// `"*"` or a list of column names.
    pub columns: ColumnsManifest,
}

/// Column section of a table manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColumnsManifest {
    /// `"*"`.
    Wildcard(String),
    /// Explicit column names.
    List(Vec<String>),
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_max_limit() -> u64 {
    DEFAULT_MAX_LIMIT
}

impl AccessPolicy {
    /// Load a policy from a JSON manifest string.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let manifest: PolicyManifest = serde_json::from_str(json)?;
        Self::from_manifest(manifest)
    }

    /// Load a policy from a JSON manifest file.
    pub fn from_path(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Convert a deserialized manifest, normalizing names and checking consistency.
    pub fn from_manifest(manifest: PolicyManifest) -> Result<Self, PolicyError> {
        let mut builder = AccessPolicy::builder()
            .dialect(manifest.dialect)
            .limits(manifest.default_limit, manifest.max_limit);

        if let Some(schema) = &manifest.default_schema {
            builder = builder.default_schema(schema);
        }
        if let Some(functions) = manifest.functions {
            builder = builder.functions(match functions {
                FunctionsManifest::Allow(names) => FunctionPolicy::allow(names),
                FunctionsManifest::Deny(names) => FunctionPolicy::deny(names),
            });
        }

        for (schema, tables) in &manifest.schemas {
            for (table, rules) in tables {
                let columns = match &rules.columns {
                    ColumnsManifest::Wildcard(star) if star == "*" => ColumnSet::All,
                    ColumnsManifest::Wildcard(other) => {
                        return Err(PolicyError::Invalid(format!(
                            "columns of `{schema}.{table}` must be \"*\" or a list, got \"{other}\""
                        )));
                    }
                    ColumnsManifest::List(names) => ColumnSet::only(names),
                };
                let mut policy = match &rules.user_key {
                    Some(key) => TablePolicy::user_scoped(key, columns),
                    None => TablePolicy::global(columns),
                };
                policy.scope = rules.scope;
                builder = builder.table(schema, table, policy);
            }
        }

        builder.build()
    }
}
