//! Validate and rewrite untrusted SQL into single, read-only, user-scoped queries.
#![warn(missing_docs)]

/// Statement classification and the read-only sweep.
pub mod classifier;
/// Table/column access, function safety, wildcard expansion and row limits.
pub mod enforcer;
/// Validation and policy errors.
pub mod error;
/// Rendering and cache-key masking of validated queries.
pub mod output;
/// SQL parsing, dialects, identifier and expression helpers.
pub mod parser;
/// Access policy model and manifest loading.
pub mod policy;
/// User-scope injection, schema qualification and the structural audit.
pub mod rewriter;
/// The end-to-end validation pipeline.
pub mod validator;

pub use error::{ErrorKind, PolicyError, ValidationError};
pub use policy::AccessPolicy;
pub use rewriter::predicate::UserId;
pub use validator::{ValidatedQuery, ValidationOptions, ValidationRequest, Validator};
