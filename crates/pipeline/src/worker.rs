//! Worker lifecycle
//!
//! A host runs one [`Worker`] per worker process (or thread):
//!
//! ```text
//! master:  resolve() ──→ prepare_zones() ──→ spawn workers
//! worker:  Worker::start() ──→ WorkerHandle::log() per request
//!                          └──→ Worker::run(shutdown) until cancelled
//! ```
//!
//! `run` owns the event loop: flush timer expiries and helper-thread
//! completions arrive as [`WorkerEvent`]s. On cancellation it stops the
//! timers, waits for the pools, stores whatever is still buffered,
//! checkpoints and closes every database.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sqlitelog_buffer::{FlushTimer, SharedBuffer, SharedZone};
use sqlitelog_store::{Database, RequestContext};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::event::WorkerEvent;
use crate::flush::FlushCoordinator;
use crate::metrics::MetricsSnapshot;
use crate::pool::InsertPool;
use crate::resolve::ResolvedConfig;
use crate::target::{LogOutcome, Target};

/// Create or reuse the shared zone of every buffered target
///
/// Runs once in the master before workers start. Zones of the same size
/// left behind by a previous run are reused with their queued rows.
pub fn prepare_zones(config: &ResolvedConfig) -> Result<Vec<SharedZone>> {
    let mut zones = Vec::new();
    for spec in &config.targets {
        let Some(buffer) = &spec.buffer else {
            continue;
        };
        if let Some(dir) = buffer.zone_path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|source| PipelineError::ZoneDir {
                path: dir.display().to_string(),
                source,
            })?;
        }

        let zone = SharedZone::create(&buffer.zone_path, buffer.size).map_err(|source| {
            PipelineError::Zone {
                target: spec.name.clone(),
                source,
            }
        })?;
        tracing::info!(
            target_name = %spec.name,
            zone = %buffer.zone_path.display(),
            size = zone.size(),
            "shared zone ready"
        );
        zones.push(zone);
    }
    Ok(zones)
}

/// Release zone locks held by a worker that died
///
/// Returns how many locks were freed.
pub fn release_dead_worker(zones: &[SharedZone], pid: u32) -> usize {
    let released = zones.iter().filter(|zone| zone.force_unlock(pid)).count();
    if released > 0 {
        tracing::warn!(pid, released, "released shared zone locks of dead worker");
    }
    released
}

/// Final state of one target after [`Worker::run`]
#[derive(Debug, Clone)]
pub struct TargetSummary {
    pub name: String,
    pub metrics: MetricsSnapshot,
}

/// Per-worker logging state for every resolved target
pub struct Worker {
    config: Arc<ResolvedConfig>,
    targets: Arc<[Arc<Target>]>,
    pools: Vec<Arc<InsertPool>>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    // keeps `events` open when nothing else sends
    _events_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl Worker {
    /// Open every target for this worker
    ///
    /// Must be called inside a tokio runtime. A target whose database
    /// cannot be opened is disabled, the rest start normally. Missing
    /// shared zones are an error: [`prepare_zones`] has to run first.
    pub fn start(config: Arc<ResolvedConfig>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        let (events_tx, events) = mpsc::unbounded_channel();

        let mut pools: HashMap<&str, Arc<InsertPool>> = HashMap::new();
        for (name, pool) in &config.pools {
            let pool = InsertPool::start(name, pool, events_tx.clone())?;
            pools.insert(name.as_str(), Arc::new(pool));
        }

        let mut targets = Vec::with_capacity(config.targets.len());
        for (index, spec) in config.targets.iter().enumerate() {
            let db = Database::new(&spec.path, Arc::clone(&spec.schema))
                .with_init_sql(spec.init_sql.clone())
                .with_busy_timeout(config.busy_timeout)
                .with_recovery(config.recovery);
            let db = Arc::new(Mutex::new(db));

            let flusher = match &spec.buffer {
                Some(buffer) => {
                    let zone = SharedZone::attach(&buffer.zone_path).map_err(|source| {
                        PipelineError::Zone {
                            target: spec.name.clone(),
                            source,
                        }
                    })?;
                    let timer = buffer.flush.map(|interval| {
                        let events = events_tx.clone();
                        FlushTimer::new(
                            Some(interval),
                            runtime.clone(),
                            Arc::new(move || {
                                // fails only once the worker has exited
                                let _ = events.send(WorkerEvent::FlushDue { target: index });
                            }),
                        )
                    });
                    Some(FlushCoordinator::new(
                        SharedBuffer::new(zone, buffer.max),
                        timer,
                        Arc::clone(&db),
                    ))
                }
                None => None,
            };

            let pool = spec
                .pool
                .as_deref()
                .and_then(|name| pools.get(name))
                .cloned();
            let target = Target::new(index, Arc::clone(spec), db, flusher, pool);
            target.open();
            targets.push(Arc::new(target));
        }

        let enabled = targets.iter().filter(|t| t.is_enabled()).count();
        tracing::info!(
            pid = std::process::id(),
            targets = targets.len(),
            enabled,
            pools = pools.len(),
            "worker started"
        );

        let pools = pools.into_values().collect();
        Ok(Self {
            config,
            targets: targets.into(),
            pools,
            events,
            _events_tx: events_tx,
        })
    }

    /// Cheap handle for the request path
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            targets: Arc::clone(&self.targets),
        }
    }

    /// Process events until `shutdown` fires, then run the exit path
    pub async fn run(mut self, shutdown: CancellationToken) -> Vec<TargetSummary> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }

        tracing::info!(pid = std::process::id(), "worker shutting down");
        self.exit().await
    }

    async fn dispatch(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::FlushDue { target } => {
                let Some(target) = self.targets.get(target).cloned() else {
                    return;
                };
                let name = target.name().to_string();
                if let Err(e) = tokio::task::spawn_blocking(move || target.flush_on_timer()).await {
                    tracing::error!(target_name = %name, error = %e, "timer flush task failed");
                }
            }
            WorkerEvent::TaskDone(done) => {
                if let Some(target) = self.targets.get(done.target) {
                    tracing::trace!(target_name = %target.name(), task = done.task, "helper task done");
                    target.complete(done.report);
                }
            }
        }
    }

    async fn exit(mut self) -> Vec<TargetSummary> {
        for target in self.targets.iter() {
            target.stop_timer();
        }

        // let queued inserts finish before the final drain
        let pools = std::mem::take(&mut self.pools);
        if let Err(e) = tokio::task::spawn_blocking(move || pools.iter().for_each(|p| p.shutdown())).await {
            tracing::error!(error = %e, "thread pool shutdown failed");
        }
        while let Ok(event) = self.events.try_recv() {
            if let WorkerEvent::TaskDone(done) = event
                && let Some(target) = self.targets.get(done.target)
            {
                target.complete(done.report);
            }
        }

        let targets = Arc::clone(&self.targets);
        let checkpoint = self.config.checkpoint_on_exit;
        if let Err(e) = tokio::task::spawn_blocking(move || {
            for target in targets.iter() {
                target.shutdown(checkpoint);
            }
        })
        .await
        {
            tracing::error!(error = %e, "target shutdown failed");
        }

        let summaries: Vec<TargetSummary> = self
            .targets
            .iter()
            .map(|t| TargetSummary {
                name: t.name().to_string(),
                metrics: t.metrics(),
            })
            .collect();

        for summary in &summaries {
            let m = &summary.metrics;
            tracing::info!(
                target_name = %summary.name,
                requests = m.requests,
                skipped = m.skipped,
                rows_inserted = m.rows_inserted,
                rows_buffered = m.rows_buffered,
                flushes = m.flushes,
                rows_dropped = m.rows_dropped,
                insert_errors = m.insert_errors,
                recoveries = m.recoveries,
                "target closed"
            );
        }
        summaries
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("targets", &self.targets)
            .field("pools", &self.pools)
            .finish()
    }
}

/// Request-path entry point, cloneable across threads
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    targets: Arc<[Arc<Target>]>,
}

impl WorkerHandle {
    /// Log one finished request to every target, in configuration order
    ///
    /// May block on SQLite for targets that are neither buffered nor async.
    pub fn log(&self, request: &dyn RequestContext) -> Vec<LogOutcome> {
        self.targets.iter().map(|t| t.log(request)).collect()
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Option<&Arc<Target>> {
        self.targets.iter().find(|t| t.name() == name)
    }

    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.targets
            .iter()
            .map(|t| (t.name().to_string(), t.metrics()))
            .collect()
    }
}
