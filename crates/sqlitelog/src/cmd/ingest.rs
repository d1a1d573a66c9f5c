//! Ingest command - replay JSON-lines requests through the targets
//!
//! Plays the host's part: prepares the shared zones once, starts
//! `--workers` workers that share them, hands each request to the next
//! worker in turn, and runs every worker's exit path at the end of input
//! or on Ctrl+C.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use sqlitelog_config::Config;
use sqlitelog_pipeline::{LogOutcome, TargetSummary, Worker, WorkerHandle, prepare_zones, resolve};
use sqlitelog_store::RequestRecord;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Ingest command arguments
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON-lines file, one request per line (stdin when omitted)
    pub input: Option<PathBuf>,

    /// Workers sharing the buffers
    #[arg(short, long, default_value_t = 1)]
    pub workers: usize,
}

/// Outcome counts over all targets
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    lines: u64,
    invalid: u64,
    skipped: u64,
    disabled: u64,
    inserted: u64,
    buffered: u64,
    flushed: u64,
    submitted: u64,
    dropped: u64,
}

impl Tally {
    fn add(&mut self, outcome: LogOutcome) {
        let slot = match outcome {
            LogOutcome::Skipped => &mut self.skipped,
            LogOutcome::Disabled => &mut self.disabled,
            LogOutcome::Inserted => &mut self.inserted,
            LogOutcome::Buffered => &mut self.buffered,
            LogOutcome::Flushed => &mut self.flushed,
            LogOutcome::Submitted => &mut self.submitted,
            LogOutcome::Dropped => &mut self.dropped,
        };
        *slot += 1;
    }
}

pub async fn run(args: IngestArgs, config: Config) -> Result<()> {
    let workers = args.workers.max(1);
    let resolved = Arc::new(resolve(&config).context("configuration does not resolve")?);
    let _zones = prepare_zones(&resolved).context("failed to prepare shared zones")?;

    let shutdown = CancellationToken::new();
    let mut handles = Vec::with_capacity(workers);
    let mut running = Vec::with_capacity(workers);
    for _ in 0..workers {
        let worker = Worker::start(Arc::clone(&resolved)).context("failed to start worker")?;
        handles.push(worker.handle());
        running.push(tokio::spawn(worker.run(shutdown.clone())));
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        targets = resolved.targets.len(),
        workers,
        "sqlitelog ingest starting"
    );

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted, flushing buffers");
            interrupt.cancel();
        }
    });

    let input = args.input.clone();
    let stop = shutdown.clone();
    let tally = tokio::task::spawn_blocking(move || -> Result<Tally> {
        let reader: Box<dyn BufRead> = match &input {
            Some(path) => Box::new(BufReader::new(
                File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
            )),
            None => Box::new(BufReader::new(io::stdin())),
        };
        replay(reader, &handles, &stop)
    })
    .await
    .context("ingest task failed")?;

    shutdown.cancel();
    let mut summaries: Vec<Vec<TargetSummary>> = Vec::with_capacity(running.len());
    for task in running {
        summaries.push(task.await.context("worker task failed")?);
    }

    let tally = tally?;
    print_report(&tally, &summaries);
    Ok(())
}

fn replay(reader: Box<dyn BufRead>, handles: &[WorkerHandle], stop: &CancellationToken) -> Result<Tally> {
    let mut tally = Tally::default();

    for (number, line) in reader.lines().enumerate() {
        if stop.is_cancelled() {
            break;
        }
        let line = line.context("failed to read input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tally.lines += 1;

        let request: RequestRecord = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping invalid request");
                tally.invalid += 1;
                continue;
            }
        };

        let handle = &handles[number % handles.len()];
        for outcome in handle.log(&request.stamped()) {
            tally.add(outcome);
        }
    }
    Ok(tally)
}

fn print_report(tally: &Tally, summaries: &[Vec<TargetSummary>]) {
    println!(
        "{} request(s), {} invalid: {} inserted, {} buffered, {} flushed, {} async, {} skipped, {} disabled, {} dropped",
        tally.lines,
        tally.invalid,
        tally.inserted,
        tally.buffered,
        tally.flushed,
        tally.submitted,
        tally.skipped,
        tally.disabled,
        tally.dropped,
    );

    let Some(first) = summaries.first() else {
        return;
    };
    for (index, target) in first.iter().enumerate() {
        let mut total = target.metrics;
        for worker in &summaries[1..] {
            if let Some(other) = worker.get(index) {
                total.rows_inserted += other.metrics.rows_inserted;
                total.rows_dropped += other.metrics.rows_dropped;
                total.flushes += other.metrics.flushes;
                total.insert_errors += other.metrics.insert_errors;
                total.recoveries += other.metrics.recoveries;
            }
        }
        println!(
            "{}: {} row(s) stored, {} flush(es), {} dropped, {} insert error(s), {} recover(ies)",
            target.name,
            total.rows_inserted,
            total.flushes,
            total.rows_dropped,
            total.insert_errors,
            total.recoveries,
        );
    }
}
