//! Relational catalog inspection tool
//!
//! Introspects a catalog dump and prints the rights-filtered model or the
//! policy-compiled `SELECT` for a table.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relcat::Catalog;
use relcat_common::CatalogConfig;
use relcat_introspect::{CatalogDump, DumpReader};
use relcat_policy::EvaluationContext;

#[derive(Parser, Debug)]
#[command(name = "relcat")]
#[command(about = "Relational catalog model and policy compiler", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "relcat.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Requester roles; none means anonymous
    #[arg(short, long, value_delimiter = ',', env = "RELCAT_ROLES")]
    roles: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the model document visible to the requester
    Model {
        /// Catalog dump (JSON)
        dump: PathBuf,
    },
    /// Print the introspection report
    Report {
        dump: PathBuf,
    },
    /// Print the policy-compiled SELECT for a table, or the projection
    /// and predicate fragments for one of its columns
    Compile {
        dump: PathBuf,
        schema: String,
        table: String,
        column: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        CatalogConfig::load(&args.config)?
    } else {
        CatalogConfig::default()
    };

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    if args.json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    info!("relcat v{}", env!("CARGO_PKG_VERSION"));
    if !args.config.exists() {
        info!("Using default configuration");
    }

    let ctx = EvaluationContext::new(args.roles.iter().map(String::as_str));

    match &args.command {
        Command::Model { dump } => {
            let catalog = open(config, dump)?;
            println!("{}", serde_json::to_string_pretty(&catalog.render(&ctx))?);
        }
        Command::Report { dump } => {
            let catalog = open(config, dump)?;
            println!("{}", serde_json::to_string_pretty(&catalog.last_report())?);
        }
        Command::Compile {
            dump,
            schema,
            table,
            column: None,
        } => {
            let catalog = open(config, dump)?;
            println!("{}", catalog.select_sql(&ctx, schema, table)?);
        }
        Command::Compile {
            dump,
            schema,
            table,
            column: Some(column),
        } => {
            let catalog = open(config, dump)?;
            let (projection, predicate) = catalog.column_sql(&ctx, schema, table, column)?;
            println!("projection: {projection}");
            println!("predicate:  {predicate}");
        }
    }

    Ok(())
}

fn open(config: CatalogConfig, dump: &Path) -> anyhow::Result<Catalog> {
    let reader = DumpReader::new(CatalogDump::load(dump)?);
    Ok(Catalog::open(config, &reader)?)
}
