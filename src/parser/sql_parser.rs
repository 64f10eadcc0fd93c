use std::fmt;

use sqlparser::ast::Statement;
use sqlparser::dialect::Dialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

use crate::error::ValidationError;
use crate::parser::dialect::SqlDialect;

/// A command the grammar could not structure, kept as one unit with no children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueCommand {
    /// Leading keyword, uppercased (`DO`, `VACUUM`, ...).
    pub keyword: String,
    /// The raw input.
    pub text: String,
}

impl fmt::Display for OpaqueCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} command", self.keyword)
    }
}

/// Exactly one parsed statement.
#[derive(Debug, Clone)]
pub enum SyntaxTree {
    /// A statement the grammar fully structured.
    Statement(Statement),
    /// Input that only looked like a command.
    Opaque(OpaqueCommand),
}

/// Parse `sql` into exactly one [`SyntaxTree`].
///
/// Statement boundaries come from the parser, never from splitting on `;`, so
/// semicolons inside literals and quoted identifiers are harmless. Input that
/// fails to parse but does not begin like a query is returned as an
/// [`OpaqueCommand`] for the classifier to reject.
pub fn parse_single_statement(sql: &str, dialect: SqlDialect) -> Result<SyntaxTree, ValidationError> {
    let grammar = dialect.parser_dialect();
    match Parser::parse_sql(grammar.as_ref(), sql) {
        Ok(mut statements) => match statements.len() {
            0 => Err(ValidationError::EmptyInput),
            1 => statements
                .pop()
                .map(SyntaxTree::Statement)
                .ok_or(ValidationError::EmptyInput),
            count => Err(ValidationError::MultipleStatements { count }),
        },
        Err(err) => match leading_token(grammar.as_ref(), sql) {
            LeadingToken::Nothing => Err(ValidationError::EmptyInput),
            LeadingToken::Command(keyword) => {
                debug!(%keyword, "unparseable input treated as opaque command");
                Ok(SyntaxTree::Opaque(OpaqueCommand {
                    keyword,
                    text: sql.to_string(),
                }))
            }
            LeadingToken::Query | LeadingToken::Other => Err(ValidationError::Parse(err.to_string())),
        },
    }
}

enum LeadingToken {
    Nothing,
    Query,
    Command(String),
    Other,
}

fn leading_token(grammar: &dyn Dialect, sql: &str) -> LeadingToken {
    let Ok(tokens) = Tokenizer::new(grammar, sql).tokenize() else {
        return LeadingToken::Other;
    };
    let first = tokens
        .iter()
        .find(|token| !matches!(token, Token::Whitespace(_) | Token::SemiColon));
    match first {
        None => LeadingToken::Nothing,
        Some(Token::LParen) => LeadingToken::Query,
        Some(Token::Word(word)) if word.quote_style.is_none() => match word.keyword {
            Keyword::SELECT | Keyword::WITH | Keyword::VALUES => LeadingToken::Query,
            _ => LeadingToken::Command(word.value.to_ascii_uppercase()),
        },
        Some(_) => LeadingToken::Other,
    }
}
