//! Checkpoint command - fold write-ahead logs back into the databases
//!
//! Safe to run while workers are logging: a busy checkpoint gives up after
//! the busy timeout instead of blocking them.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use sqlitelog_config::Config;
use sqlitelog_pipeline::resolve;
use sqlitelog_store::{CheckpointOutcome, Database};
use tracing::{error, info};

/// Checkpoint command arguments
#[derive(Args, Debug)]
pub struct CheckpointArgs {
    /// Only checkpoint the target with this name (its configured path)
    #[arg(short, long)]
    pub target: Option<String>,
}

pub fn run(args: CheckpointArgs, config: &Config) -> Result<()> {
    let resolved = resolve(config).context("configuration does not resolve")?;

    let mut failed = 0usize;
    let mut matched = 0usize;
    for spec in &resolved.targets {
        if args.target.as_deref().is_some_and(|name| name != spec.name) {
            continue;
        }
        matched += 1;

        let mut db = Database::new(&spec.path, Arc::clone(&spec.schema))
            .with_init_sql(spec.init_sql.clone())
            .with_busy_timeout(resolved.busy_timeout)
            .with_recovery(resolved.recovery);

        let outcome = db.init().and_then(|()| db.checkpoint());
        if let Err(e) = db.close() {
            error!(target_name = %spec.name, error = %e, "failed to close database");
        }

        match outcome {
            Ok(CheckpointOutcome::NotWal) => println!("{}: not in WAL mode", spec.name),
            Ok(CheckpointOutcome::Completed {
                log_frames,
                checkpointed_frames,
            }) => println!("{}: {checkpointed_frames}/{log_frames} frames", spec.name),
            Ok(CheckpointOutcome::StillBusy { slept }) => {
                println!("{}: busy after {}ms, skipped", spec.name, slept.as_millis());
            }
            Err(e) => {
                error!(target_name = %spec.name, error = %e, "checkpoint failed");
                failed += 1;
            }
        }
    }

    if let Some(name) = &args.target
        && matched == 0
    {
        anyhow::bail!("no enabled target named '{name}'");
    }
    if failed > 0 {
        anyhow::bail!("{failed} checkpoint(s) failed");
    }
    info!(targets = matched, "checkpoint complete");
    Ok(())
}
