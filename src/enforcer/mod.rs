/// Table and column access checks over the whole tree.
pub mod access;
/// Function allowlist / denylist checks.
pub mod functions;
/// Row-limit injection and clamping on the outermost query.
pub mod limit;
/// Per-SELECT source resolution shared by the access checks and rewriters.
pub mod scope;
/// Wildcard expansion over column-restricted tables.
pub mod star;
