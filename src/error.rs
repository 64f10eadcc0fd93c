use std::fmt;
use std::ops::ControlFlow;

use thiserror::Error;

/// Text shown to end users for every rejection, whatever the internal cause.
pub const PUBLIC_REJECTION_MESSAGE: &str = "query could not be validated";

/// The object an access check refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeniedObject {
    /// A table (schema-qualified when known) outside the policy.
    Table(String),
    /// A column outside the allowed set of its resolved table.
    Column {
        /// Table the column resolved to, or the qualifier as written.
        table: Option<String>,
        /// Column name as written.
        column: String,
    },
}

impl fmt::Display for DeniedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeniedObject::Table(table) => write!(f, "table `{table}`"),
            DeniedObject::Column {
                table: Some(table),
                column,
            } => write!(f, "column `{column}` on `{table}`"),
            DeniedObject::Column {
                table: None,
                column,
            } => write!(f, "column `{column}`"),
        }
    }
}

/// Why a query failed validation. Every variant is terminal for the request.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The dialect parser rejected the input.
    #[error("invalid SQL: {0}")]
    Parse(String),

    /// Nothing but whitespace, comments or semicolons.
    #[error("empty SQL statement")]
    EmptyInput,

    /// More than one statement was parsed from the input.
    #[error("multi-statement input is not allowed ({count} statements)")]
    MultipleStatements {
        /// Number of statements the parser produced.
        count: usize,
    },

    /// The statement (or a nested part of it) is not a read-only query.
    #[error("only SELECT queries are allowed: {0}")]
    DisallowedStatement(String),

    /// A table or column outside the access policy.
    #[error("access denied to {0}")]
    AccessDenied(DeniedObject),

    /// An unqualified column that more than one source in scope could supply.
    #[error("column `{column}` is ambiguous between {}; qualify it with a table name", .candidates.join(", "))]
    AmbiguousColumn {
        /// Column name as written.
        column: String,
        /// Qualifiers of the sources that could supply it.
        candidates: Vec<String>,
    },

    /// A function call refused by the function policy.
    #[error("blocked function `{0}`")]
    UnsafeFunction(String),

    /// A node kind the validator does not model structurally.
    #[error("unsupported SQL construct: {0}")]
    UnsupportedConstruct(String),

    /// The rewritten tree lacks a mandatory user-scope conjunct.
    #[error("audit failed: SELECT on user-scoped table `{table}` is missing `{expected}` as a top-level conjunct")]
    AuditFailed {
        /// Table whose filter is missing.
        table: String,
        /// The predicate the audit expected, rendered as SQL.
        expected: String,
    },
}

/// Coarse classification of [`ValidationError`] for callers and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed, empty or multi-statement input.
    Parse,
    /// Non-query root or nested write/lock/DDL construct.
    DisallowedStatement,
    /// Table or column outside policy.
    AccessDenied,
    /// Unqualified column with several candidate sources.
    AmbiguousColumn,
    /// Function refused by policy.
    UnsafeFunction,
    /// Opaque sub-node inside an otherwise structured tree.
    UnsupportedConstruct,
    /// Post-rewrite invariant violated.
    AuditFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse_error",
            ErrorKind::DisallowedStatement => "disallowed_statement",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::AmbiguousColumn => "ambiguous_column",
            ErrorKind::UnsafeFunction => "unsafe_function",
            ErrorKind::UnsupportedConstruct => "unsupported_construct",
            ErrorKind::AuditFailed => "audit_failed",
        };
        f.write_str(name)
    }
}

impl ValidationError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::Parse(_)
            | ValidationError::EmptyInput
            | ValidationError::MultipleStatements { .. } => ErrorKind::Parse,
            ValidationError::DisallowedStatement(_) => ErrorKind::DisallowedStatement,
            ValidationError::AccessDenied(_) => ErrorKind::AccessDenied,
            ValidationError::AmbiguousColumn { .. } => ErrorKind::AmbiguousColumn,
            ValidationError::UnsafeFunction(_) => ErrorKind::UnsafeFunction,
            ValidationError::UnsupportedConstruct(_) => ErrorKind::UnsupportedConstruct,
            ValidationError::AuditFailed { .. } => ErrorKind::AuditFailed,
        }
    }

    /// Message safe to show an end user: never names tables, columns or functions.
    pub fn public_message(&self) -> &'static str {
        PUBLIC_REJECTION_MESSAGE
    }

    pub(crate) fn denied_table(table: impl Into<String>) -> Self {
        ValidationError::AccessDenied(DeniedObject::Table(table.into()))
    }

    pub(crate) fn denied_column(table: Option<String>, column: impl Into<String>) -> Self {
        ValidationError::AccessDenied(DeniedObject::Column {
            table,
            column: column.into(),
        })
    }

    pub(crate) fn unsupported(what: impl fmt::Display) -> Self {
        ValidationError::UnsupportedConstruct(what.to_string())
    }
}

/// Bridge a stage result into a `sqlparser` visitor hook.
pub(crate) fn flow(result: Result<(), ValidationError>) -> ControlFlow<ValidationError> {
    match result {
        Ok(()) => ControlFlow::Continue(()),
        Err(err) => ControlFlow::Break(err),
    }
}

/// Bridge a finished visitor walk back into a stage result.
pub(crate) fn finish(flow: ControlFlow<ValidationError>) -> Result<(), ValidationError> {
    match flow {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(err) => Err(err),
    }
}

/// Errors raised while loading or checking an access policy manifest.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The manifest is not valid JSON for the expected shape.
    #[error("invalid policy manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The manifest file could not be read.
    #[error("failed to read policy manifest: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest parsed but is internally inconsistent.
    #[error("invalid policy: {0}")]
    Invalid(String),
}
