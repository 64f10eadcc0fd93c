use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    Dialect, DuckDbDialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};

/// SQL dialect used both to parse incoming text and to render the rewritten tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    /// `PostgreSQL`.
    #[default]
    Postgres,
    /// ANSI-ish generic grammar.
    Generic,
    /// `MySQL`.
    #[value(name = "mysql")]
    MySql,
    /// `SQLite`.
    Sqlite,
    /// `DuckDB`.
    #[value(name = "duckdb")]
    DuckDb,
}

impl SqlDialect {
    /// The `sqlparser` grammar for this dialect.
    pub fn parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
            SqlDialect::DuckDb => Box::new(DuckDbDialect {}),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::Generic => "generic",
            SqlDialect::MySql => "mysql",
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::DuckDb => "duckdb",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_names_match_display() {
        for dialect in SqlDialect::value_variants() {
            let json = format!("\"{dialect}\"");
            let parsed: SqlDialect = serde_json::from_str(&json).expect("dialect name");
            assert_eq!(parsed, *dialect);
        }
    }
}
