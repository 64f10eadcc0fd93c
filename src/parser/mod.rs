/// Dialect selection for parsing and rendering.
pub mod dialect;
/// Expression child enumeration over the supported node kinds, plus literal helpers.
pub mod expr;
/// Identifier and table-name normalization helpers (schema-qualified names, quoted identifiers).
pub mod names;
/// Single-statement parsing into a [`sql_parser::SyntaxTree`].
pub mod sql_parser;
