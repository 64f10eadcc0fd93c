use sqlparser::ast::Statement;

/// Render a verified statement as SQL text.
///
/// Total over every tree the earlier stages accept; the text round-trips
/// through the same dialect parser.
pub fn render(statement: &Statement) -> String {
    statement.to_string()
}
