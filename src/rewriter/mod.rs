/// Structural post-rewrite audit of the user-scope predicates.
pub mod audit;
/// User-scope predicate injection: strip, wrap, conjoin.
pub mod injector;
/// User identity, scoping rules and the authoritative predicate.
pub mod predicate;
/// Default-schema qualification of policy tables.
pub mod schema_qualifier;
