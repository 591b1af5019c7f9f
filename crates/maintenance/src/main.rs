//! Stock projection maintenance CLI.
//!
//! # Usage
//!
//! ```bash
//! stockledger migrate
//! stockledger resync
//! stockledger cleanup-orphans
//! stockledger integrity
//! stockledger fix-integrity
//! stockledger stats
//! ```
//!
//! Reads `DATABASE_URL` (a `.env` file is honoured) and the `STOCKLEDGER_*`
//! engine settings. Every command prints its report as JSON on stdout.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "stockledger")]
#[command(author, version, about = "Stock projection maintenance tools")]
struct Cli {
    /// Postgres connection string; defaults to `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Re-project every non-deleted product into the Stocks table
    Resync,
    /// Delete Stocks rows without a batch id
    CleanupOrphans,
    /// Report projection drift without changing anything
    Integrity,
    /// Clean up orphans, resync, prune rows of removed batches, then report
    FixIntegrity,
    /// Row and product counts of the projection
    Stats,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    stockledger_observability::init();

    let cli = Cli::parse();

    if let Err(e) = commands::run(&cli.database_url, cli.command).await {
        tracing::error!(error = format!("{e:#}"), "command failed");
        std::process::exit(1);
    }
}
