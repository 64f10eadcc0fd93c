/// Read-only sweep over every query node of a statement.
pub mod read_only;
/// Root statement classification: SELECT, set operation, or rejected.
pub mod statement_classifier;
