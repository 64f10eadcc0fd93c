use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::parser::dialect::SqlDialect;
use crate::parser::names::normalize_identifier;

/// Row limit applied when a query has none and the request does not override it.
pub const DEFAULT_LIMIT: u64 = 50;

/// Largest row limit any query may carry.
pub const DEFAULT_MAX_LIMIT: u64 = 1000;

/// Functions that are refused even when a manifest uses a denylist.
pub const DANGEROUS_FUNCTIONS: &[&str] = &[
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    "pg_cancel_backend",
    "pg_terminate_backend",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_ls_logdir",
    "pg_ls_waldir",
    "pg_stat_file",
    "lo_import",
    "lo_export",
    "pg_advisory_lock",
    "pg_advisory_xact_lock",
    "dblink",
    "dblink_exec",
    "dblink_connect",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "cursor_to_xml",
    "table_to_xml",
    "set_config",
    "pg_reload_conf",
    "pg_rotate_logfile",
];

/// Functions permitted by [`FunctionPolicy::default`].
pub const DEFAULT_SAFE_FUNCTIONS: &[&str] = &[
    "abs",
    "age",
    "array_agg",
    "avg",
    "bool_and",
    "bool_or",
    "ceil",
    "ceiling",
    "coalesce",
    "concat",
    "concat_ws",
    "count",
    "cume_dist",
    "current_date",
    "current_time",
    "current_timestamp",
    "date_part",
    "date_trunc",
    "dense_rank",
    "extract",
    "first_value",
    "floor",
    "greatest",
    "initcap",
    "lag",
    "last_value",
    "lead",
    "least",
    "left",
    "length",
    "localtime",
    "localtimestamp",
    "lower",
    "lpad",
    "ltrim",
    "max",
    "min",
    "mod",
    "now",
    "nth_value",
    "ntile",
    "nullif",
    "percent_rank",
    "percentile_cont",
    "percentile_disc",
    "position",
    "power",
    "rank",
    "replace",
    "right",
    "round",
    "row_number",
    "rpad",
    "rtrim",
    "sign",
    "split_part",
    "sqrt",
    "stddev",
    "stddev_pop",
    "stddev_samp",
    "string_agg",
    "substr",
    "substring",
    "sum",
    "to_char",
    "to_date",
    "to_number",
    "to_timestamp",
    "trim",
    "trunc",
    "upper",
    "var_pop",
    "var_samp",
    "variance",
];

/// Whether every row of a table is visible or only the caller's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableScope {
    /// All rows are visible to every user.
    Global,
    /// Only rows whose user key equals the caller's identity are visible.
    User,
}

/// Columns of a table a query may reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSet {
    /// Every column of the table.
    All,
    /// Only the listed (normalized) column names.
    Only(BTreeSet<String>),
}

impl ColumnSet {
    /// Build a restricted set, normalizing each name.
    pub fn only<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ColumnSet::Only(
            columns
                .into_iter()
                .map(|c| normalize_identifier(c.as_ref()))
                .collect(),
        )
    }

    /// True when `column` (already normalized) may be referenced.
    pub fn allows(&self, column: &str) -> bool {
        match self {
            ColumnSet::All => true,
            ColumnSet::Only(columns) => columns.contains(column),
        }
    }
}

/// Access rules for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePolicy {
    /// Row visibility scope.
    pub scope: TableScope,
    /// Column holding the owning user's identity (the scoping column).
    pub user_key: Option<String>,
    /// Columns a query may reference.
    pub columns: ColumnSet,
}

impl TablePolicy {
    /// A table whose rows are filtered to the caller through `user_key`.
    pub fn user_scoped(user_key: &str, columns: ColumnSet) -> Self {
        Self {
            scope: TableScope::User,
            user_key: Some(normalize_identifier(user_key)),
            columns,
        }
    }

    /// A table whose rows are all visible.
    pub fn global(columns: ColumnSet) -> Self {
        Self {
            scope: TableScope::Global,
            user_key: None,
            columns,
        }
    }

    /// The scoping column to enforce, honoring the global-table opt-in.
    pub fn scoping_column(&self, include_global: bool) -> Option<&str> {
        match self.scope {
            TableScope::User => self.user_key.as_deref(),
            TableScope::Global if include_global => self.user_key.as_deref(),
            TableScope::Global => None,
        }
    }
}

/// Which functions a query may call. Names are normalized and compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionPolicy {
    /// Only the listed functions may be called.
    Allow(BTreeSet<String>),
    /// Any function except the listed ones and [`DANGEROUS_FUNCTIONS`].
    Deny(BTreeSet<String>),
}

impl Default for FunctionPolicy {
    fn default() -> Self {
        FunctionPolicy::allow(DEFAULT_SAFE_FUNCTIONS.iter().copied())
    }
}

impl FunctionPolicy {
    /// Allowlist policy.
    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        FunctionPolicy::Allow(names.into_iter().map(|n| normalize_identifier(n.as_ref())).collect())
    }

    /// Denylist policy; the dangerous baseline is always included.
    pub fn deny<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut denied: BTreeSet<String> =
            names.into_iter().map(|n| normalize_identifier(n.as_ref())).collect();
        denied.extend(DANGEROUS_FUNCTIONS.iter().map(|n| (*n).to_string()));
        FunctionPolicy::Deny(denied)
    }

    /// Decide whether a call to `schema.name` is permitted.
    ///
    /// Under an allowlist a schema-qualified call is only accepted for `pg_catalog`,
    /// so user-defined functions cannot hide behind an allowed name.
    pub fn permits(&self, schema: Option<&str>, name: &str) -> bool {
        let name = normalize_identifier(name);
        match self {
            FunctionPolicy::Allow(allowed) => {
                let schema_ok = schema
                    .map(normalize_identifier)
                    .is_none_or(|s| s == "pg_catalog");
                schema_ok && allowed.contains(&name)
            }
            FunctionPolicy::Deny(denied) => !denied.contains(&name),
        }
    }
}

/// A table resolved against the policy.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTable<'p> {
    /// Schema the table was found in.
    pub schema: &'p str,
    /// Normalized table name.
    pub name: &'p str,
    /// Its access rules.
    pub policy: &'p TablePolicy,
}

impl ResolvedTable<'_> {
    /// `schema.table`, used in diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Immutable access policy shared by every validation.
///
/// Build it once (from a manifest or [`AccessPolicy::builder`]) and share it
/// behind an `Arc`; nothing mutates it after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    pub(crate) dialect: SqlDialect,
    pub(crate) default_schema: Option<String>,
    pub(crate) default_limit: u64,
    pub(crate) max_limit: u64,
    pub(crate) functions: FunctionPolicy,
    pub(crate) schemas: BTreeMap<String, BTreeMap<String, TablePolicy>>,
}

impl AccessPolicy {
    /// Start building a policy programmatically.
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Dialect used to parse incoming SQL.
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// The same policy, parsing with `dialect` instead.
    #[must_use]
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Schema unqualified table names resolve into, if any.
    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    /// Limit injected into queries without one.
    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }

    /// Upper bound for any query's limit.
    pub fn max_limit(&self) -> u64 {
        self.max_limit
    }

    /// Function rules.
    pub fn functions(&self) -> &FunctionPolicy {
        &self.functions
    }

    /// Iterate over every `(schema, table, policy)` triple.
    pub fn tables(&self) -> impl Iterator<Item = ResolvedTable<'_>> {
        self.schemas.iter().flat_map(|(schema, tables)| {
            tables.iter().map(move |(name, policy)| ResolvedTable {
                schema,
                name,
                policy,
            })
        })
    }

    /// True when some schema declares a table with this (normalized) name.
    pub fn has_table_named(&self, name: &str) -> bool {
        self.schemas.values().any(|tables| tables.contains_key(name))
    }

    /// Resolve a (normalized) table reference.
    ///
    /// An explicit schema must match exactly. Without one, the default schema
    /// is used when configured; otherwise the name must be unique across schemas.
    pub fn resolve_table(&self, schema: Option<&str>, name: &str) -> Option<ResolvedTable<'_>> {
        let lookup = |schema_name: &str| {
            self.schemas
                .get_key_value(schema_name)
                .and_then(|(schema, tables)| {
                    tables.get_key_value(name).map(|(name, policy)| ResolvedTable {
                        schema,
                        name,
                        policy,
                    })
                })
        };

        if let Some(schema) = schema {
            return lookup(schema);
        }
        if let Some(default_schema) = &self.default_schema {
            return lookup(default_schema);
        }

        let mut found = self.tables().filter(|t| t.name == name);
        let first = found.next()?;
        if found.next().is_some() {
            return None;
        }
        Some(first)
    }

    fn check(self) -> Result<Self, PolicyError> {
        if self.max_limit == 0 {
            return Err(PolicyError::Invalid("max_limit must be positive".into()));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(PolicyError::Invalid(format!(
                "default_limit {} must be between 1 and max_limit {}",
                self.default_limit, self.max_limit
            )));
        }
        if let Some(default_schema) = &self.default_schema {
            if !self.schemas.contains_key(default_schema) {
                return Err(PolicyError::Invalid(format!(
                    "default_schema `{default_schema}` declares no tables"
                )));
            }
        }
        for table in self.tables() {
            let qualified = table.qualified_name();
            match (&table.policy.scope, &table.policy.user_key) {
                (TableScope::User, None) => {
                    return Err(PolicyError::Invalid(format!(
                        "user-scoped table `{qualified}` has no user_key"
                    )));
                }
                (_, Some(key)) if !table.policy.columns.allows(key) => {
                    return Err(PolicyError::Invalid(format!(
                        "user_key `{key}` of `{qualified}` is not an allowed column"
                    )));
                }
                _ => {}
            }
        }
        Ok(self)
    }
}

/// Incremental construction of an [`AccessPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    policy: AccessPolicy,
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self {
            policy: AccessPolicy {
                dialect: SqlDialect::default(),
                default_schema: None,
                default_limit: DEFAULT_LIMIT,
                max_limit: DEFAULT_MAX_LIMIT,
                functions: FunctionPolicy::default(),
                schemas: BTreeMap::new(),
            },
        }
    }
}

impl PolicyBuilder {
    /// Parse incoming SQL with this dialect.
    pub fn dialect(mut self, dialect: SqlDialect) -> Self {
        self.policy.dialect = dialect;
        self
    }

    /// Resolve unqualified tables into `schema` and qualify them on output.
    pub fn default_schema(mut self, schema: &str) -> Self {
        self.policy.default_schema = Some(normalize_identifier(schema));
        self
    }

    /// Set the injected default limit and the hard maximum.
    pub fn limits(mut self, default_limit: u64, max_limit: u64) -> Self {
        self.policy.default_limit = default_limit;
        self.policy.max_limit = max_limit;
        self
    }

    /// Replace the function rules.
    pub fn functions(mut self, functions: FunctionPolicy) -> Self {
        self.policy.functions = functions;
        self
    }

    /// Declare a table.
    pub fn table(mut self, schema: &str, table: &str, policy: TablePolicy) -> Self {
        self.policy
            .schemas
            .entry(normalize_identifier(schema))
            .or_default()
            .insert(normalize_identifier(table), policy);
        self
    }

    /// Check consistency and produce the immutable policy.
    pub fn build(self) -> Result<AccessPolicy, PolicyError> {
        self.policy.check()
    }
}
