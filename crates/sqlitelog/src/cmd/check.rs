//! Check command - validate a configuration
//!
//! Loading already validated the file; this also resolves it, which reads
//! init scripts and probes every schema against an in-memory database.

use anyhow::{Context, Result};
use clap::Args;
use sqlitelog_config::Config;
use sqlitelog_pipeline::resolve;

/// Check command arguments
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Print the CREATE TABLE statement of each target
    #[arg(long)]
    pub sql: bool,
}

pub fn run(args: CheckArgs, config: &Config) -> Result<()> {
    let resolved = resolve(config).context("configuration does not resolve")?;

    if resolved.targets.is_empty() {
        println!("configuration ok, no enabled targets");
        return Ok(());
    }

    println!("configuration ok, {} target(s)", resolved.targets.len());
    for spec in &resolved.targets {
        println!();
        println!("{}", spec.name);
        println!("  database  {}", spec.path.display());
        println!("  format    {} (table {})", spec.format, spec.schema.table());
        match &spec.buffer {
            Some(buffer) => {
                let max = buffer.max.map_or_else(|| "unlimited".to_string(), |m| m.to_string());
                let flush = buffer
                    .flush
                    .map_or_else(|| "none".to_string(), |d| format!("{}s", d.as_secs()));
                println!(
                    "  buffer    {} bytes, max {max} rows, flush {flush}",
                    buffer.size
                );
                println!("  zone      {}", buffer.zone_path.display());
            }
            None => println!("  buffer    none"),
        }
        if let Some(pool) = &spec.pool {
            println!("  async     pool {pool}");
        }
        if spec.init_sql.is_some() {
            println!("  init      loaded");
        }
        if args.sql {
            println!("  sql       {}", spec.schema.create_sql());
        }
    }
    Ok(())
}
