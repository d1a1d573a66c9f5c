//! sqlitelog - buffered request logging into SQLite
//!
//! # Usage
//!
//! ```bash
//! # Validate a configuration and print the resolved targets
//! sqlitelog check --config sqlitelog.toml
//!
//! # Replay JSON-lines requests through four workers sharing the buffers
//! sqlitelog ingest --config sqlitelog.toml --workers 4 requests.jsonl
//!
//! # Fold every target's write-ahead log back into its database
//! sqlitelog checkpoint --config sqlitelog.toml
//! ```

mod cmd;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlitelog_config::Config;

/// sqlitelog - buffered request logging into SQLite
#[derive(Parser, Debug)]
#[command(name = "sqlitelog")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "sqlitelog.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print resolved targets
    Check(cmd::check::CheckArgs),

    /// Log JSON-lines requests through the configured targets
    Ingest(cmd::ingest::IngestArgs),

    /// Run a WAL checkpoint on every target database
    Checkpoint(cmd::checkpoint::CheckpointArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init(&config.log, cli.log_level.as_deref())?;

    match cli.command {
        Command::Check(args) => cmd::check::run(args, &config),
        Command::Ingest(args) => cmd::ingest::run(args, config).await,
        Command::Checkpoint(args) => cmd::checkpoint::run(args, &config),
    }
}

fn load_config(path: &std::path::Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    Config::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}
