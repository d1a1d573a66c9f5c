//! Diagnostic logging bootstrap from `[log]`

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use sqlitelog_config::{LogConfig, LogFormat, LogOutput};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber
///
/// Level: CLI flag, then `[log] level`. `[log] filter` directives are
/// appended after the level.
pub fn init(config: &LogConfig, cli_level: Option<&str>) -> Result<()> {
    let directives = config.directives(cli_level);
    let filter = EnvFilter::try_new(&directives)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log filter '{directives}': {e}"))?;

    let (writer, ansi) = match &config.output {
        LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {path}"))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(writer),
            )
            .init(),
        LogFormat::Console => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .init(),
    }

    Ok(())
}
