/// The immutable policy model: tables, columns, scoping keys, functions and limits.
pub mod access_policy;
/// JSON manifest loading.
pub mod manifest;

pub use access_policy::{
    AccessPolicy, ColumnSet, FunctionPolicy, PolicyBuilder, ResolvedTable, TablePolicy,
    TableScope,
};
pub use manifest::PolicyManifest;
