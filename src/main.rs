//! CLI entry point for `sqlwarden`.

use std::io::Read;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use sqlwarden::parser::dialect::SqlDialect;
use sqlwarden::{AccessPolicy, UserId, ValidationOptions, ValidationRequest, Validator};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sqlwarden",
    about = "Validate untrusted SQL and rewrite it into a user-scoped, read-only query"
)]
struct Cli {
    /// SQL to validate (read from stdin when omitted)
    sql: Option<String>,

    /// JSON access policy manifest
    #[arg(long, env = "SQLWARDEN_MANIFEST")]
    manifest: PathBuf,

    /// Parse with this dialect instead of the manifest's
    #[arg(long, value_enum)]
    dialect: Option<SqlDialect>,

    /// Identity the query runs for
    #[arg(long)]
    user_id: UserId,

    /// Default row limit for this query (clamped to the manifest maximum)
    #[arg(long)]
    limit: Option<u64>,

    /// Do not inject the user-scope predicate
    #[arg(long)]
    skip_user_filter: bool,

    /// Table (`table` or `schema.table`) to leave unscoped; repeatable
    #[arg(long = "skip-table", value_name = "TABLE")]
    skip_tables: Vec<String>,

    /// Inject this identity instead of --user-id
    #[arg(long)]
    override_user_id: Option<UserId>,

    /// Also scope global tables that declare a user key
    #[arg(long)]
    enforce_on_global_tables: bool,

    /// Print the validated query as JSON (sql, cache key, scoped tables, limit)
    #[arg(long)]
    json: bool,

    /// Print verbose diagnostics
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let policy = match AccessPolicy::from_path(&cli.manifest) {
        Ok(policy) => match cli.dialect {
            Some(dialect) => policy.with_dialect(dialect),
            None => policy,
        },
        Err(e) => {
            eprintln!("Error loading manifest {}: {e}", cli.manifest.display());
            process::exit(2);
        }
    };

    let sql = match &cli.sql {
        Some(sql) => sql.clone(),
        None => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("Error reading SQL from stdin: {e}");
                process::exit(2);
            }
            buf
        }
    };

    let request = ValidationRequest::new(sql, cli.user_id.clone()).with_options(ValidationOptions {
        skip_user_filter: cli.skip_user_filter,
        skip_user_filter_tables: cli.skip_tables.clone(),
        override_user_id: cli.override_user_id.clone(),
        limit: cli.limit,
        enforce_on_global_tables: cli.enforce_on_global_tables,
    });

    let validator = Validator::new(policy);
    match validator.validate(&request) {
        Ok(validated) if cli.json => match serde_json::to_string_pretty(&validated) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error encoding result: {e}");
                process::exit(2);
            }
        },
        Ok(validated) => println!("{}", validated.sql),
        Err(e) => {
            eprintln!("Rejected: {}", e.public_message());
            eprintln!("  [{}] {e}", e.kind());
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("sqlwarden=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
