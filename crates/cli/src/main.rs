//! `entity-repo` CLI entry-point.
//!
//! Available sub-commands, all over the `models` table:
//! - `migrate`       — run pending database migrations.
//! - `create`        — insert a model.
//! - `find`          — list models, optionally by name.
//! - `find-where-in` — list models whose name is one of several.
//! - `delete-by`     — delete models by name.

mod model;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use repository::{Attributes, Record, Relations};
use store::{run_migrations, DatabaseConfig, SqlConnection};

use crate::model::Model;

#[derive(Parser)]
#[command(
    name = "entity-repo",
    about = "Generic entity repository over SQLite or PostgreSQL",
    version
)]
struct Cli {
    /// Database URL (`sqlite:…` or `postgres://…`).
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Log filter, e.g. `info` or `repository=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pending database migrations.
    Migrate,
    /// Insert a model and print it as stored.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Print models, all of them or those with the given name.
    Find {
        #[arg(long)]
        name: Option<String>,
    },
    /// Print models whose name is any of the given ones.
    FindWhereIn {
        #[arg(long = "name", required = true)]
        names: Vec<String>,
    },
    /// Delete models with the given name and print the count.
    DeleteBy {
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).context("invalid log filter")?)
        .init();

    let mut config = DatabaseConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config.url = url;
    }
    let dialect = config.dialect()?;

    let conn = SqlConnection::connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.identity()))?;

    // A fresh in-memory database has no schema yet.
    if matches!(cli.command, Command::Migrate) || config.is_sqlite_memory() {
        if let Some(pool) = conn.pool() {
            run_migrations(pool, dialect).await.context("migration failed")?;
        }
        if matches!(cli.command, Command::Migrate) {
            info!("Migrations applied successfully");
            return Ok(());
        }
    }

    let repo = repository::get_repository::<Model, _>(&conn)?;

    match cli.command {
        Command::Migrate => {}
        Command::Create { name, description } => {
            let created = repo
                .create(&json!({ "name": name, "description": description }), None)
                .await?;
            print_records(&[created])?;
        }
        Command::Find { name } => {
            let mut filter = Attributes::new();
            if let Some(name) = name {
                filter.insert("name".into(), Value::String(name));
            }
            let found = repo.find(&filter, Relations::none(), None).await?;
            print_records(&found)?;
        }
        Command::FindWhereIn { names } => {
            let names = names.into_iter().map(Value::String).collect();
            let found = repo.find_where_in(("name", names), Relations::none(), None).await?;
            print_records(&found)?;
        }
        Command::DeleteBy { name } => {
            let mut filter = Attributes::new();
            filter.insert("name".into(), Value::String(name));
            let deleted = repo.delete_by(&filter, None).await?;
            info!("Deleted {deleted} model(s)");
            println!("{deleted}");
        }
    }

    Ok(())
}

/// One JSON object per line.
fn print_records(records: &[Record]) -> anyhow::Result<()> {
    for record in records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}
