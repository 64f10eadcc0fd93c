use sqlparser::ast::{Ident, ObjectName};

use crate::error::ValidationError;

/// Return the identifier without surrounding double quotes.
pub fn unquote_identifier(ident: &str) -> &str {
    ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(ident)
}

/// Normalize an identifier for case-insensitive matching.
///
/// Trims whitespace, removes surrounding double quotes on a single identifier,
/// and lowercases the result.
pub fn normalize_identifier(ident: &str) -> String {
    unquote_identifier(ident.trim()).to_ascii_lowercase()
}

/// Lookup key for a parsed identifier.
///
/// Unquoted identifiers fold to lowercase; quoted ones keep their exact spelling,
/// so `"Employee"` never matches a policy table named `employee`.
pub fn ident_key(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_ascii_lowercase(),
    }
}

/// Split a potentially schema-qualified name into `(schema, relation)`.
///
/// Handles dots inside quoted identifiers, e.g. `"my.schema"."table.name"`.
pub fn split_schema_and_relation(name: &str) -> Option<(String, String)> {
    let mut in_quotes = false;
    let mut start = 0usize;
    let mut parts: Vec<&str> = Vec::new();

    for (idx, ch) in name.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                parts.push(name[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(name[start..].trim());

    if parts.len() < 2 {
        return None;
    }

    let schema = unquote_identifier(parts[parts.len() - 2]).to_string();
    let relation = unquote_identifier(parts[parts.len() - 1]).to_string();
    Some((schema, relation))
}

/// Normalize a textual `[schema.]table` reference into `(schema, table)` keys.
///
/// Used for names that arrive as plain strings (CLI flags, request options)
/// rather than parsed identifiers.
pub fn normalize_table_reference(name: &str) -> (Option<String>, String) {
    match split_schema_and_relation(name.trim()) {
        Some((schema, relation)) => (
            Some(normalize_identifier(&schema)),
            normalize_identifier(&relation),
        ),
        None => (None, normalize_identifier(name)),
    }
}

/// The plain identifier parts of an object name.
///
/// Parts that are not identifiers (function-call segments some dialects allow)
/// are rejected as unsupported.
pub fn object_name_idents(name: &ObjectName) -> Result<Vec<&Ident>, ValidationError> {
    name.0
        .iter()
        .map(|part| {
            part.as_ident()
                .ok_or_else(|| ValidationError::unsupported(format!("object name `{name}`")))
        })
        .collect()
}

/// A table reference split into normalized `(schema, table)` keys.
///
/// Catalog-qualified names (three or more parts) address objects outside any
/// policy schema and are denied outright.
pub fn split_table_name(name: &ObjectName) -> Result<(Option<String>, String), ValidationError> {
    match object_name_idents(name)?.as_slice() {
        [table] => Ok((None, ident_key(table))),
        [schema, table] => Ok((Some(ident_key(schema)), ident_key(table))),
        _ => Err(ValidationError::denied_table(name.to_string())),
    }
}

/// A function name split into normalized `(schema, function)` keys.
pub fn split_function_name(
    name: &ObjectName,
) -> Result<(Option<String>, String), ValidationError> {
    match object_name_idents(name)?.as_slice() {
        [function] => Ok((None, ident_key(function))),
        [schema, function] => Ok((Some(ident_key(schema)), ident_key(function))),
        _ => Err(ValidationError::UnsafeFunction(name.to_string())),
    }
}

/// The last identifier of an object name, which is how an unaliased table is
/// referred to elsewhere in the query.
pub fn terminal_ident(name: &ObjectName) -> Result<Ident, ValidationError> {
    object_name_idents(name)?
        .last()
        .map(|ident| (*ident).clone())
        .ok_or_else(|| ValidationError::unsupported("empty object name"))
}

/// Identifier for a normalized policy name (schema or column), quoted only when it would not
/// survive as a bare lowercase identifier.
pub fn policy_ident(name: &str) -> Ident {
    let bare = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if bare {
        Ident::new(name)
    } else {
        Ident::with_quote('"', name)
    }
}
