//! Request handling for one target
//!
//! A [`Target`] turns a finished request into a row and gets it into the
//! database by one of four paths:
//!
//! | buffer | pool | path |
//! |--------|------|------|
//! | no | no | insert inline |
//! | no | yes | insert on a helper thread |
//! | yes | no | push; on full or overflow, flush inline |
//! | yes | yes | push; on full or overflow, store on a helper thread |
//!
//! An inline insert failure disables the target for this worker and closes
//! its database; rows for it are ignored until the worker restarts. Timer
//! flushes and helper-thread failures are logged and counted instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sqlitelog_store::{Database, DbError, RequestContext, Row};

use crate::event::TaskReport;
use crate::flush::{FlushCoordinator, FlushReport, FlushTrigger, Offer};
use crate::metrics::{MetricsSnapshot, TargetMetrics};
use crate::pool::InsertPool;
use crate::rate_limit::{DEFAULT_LOG_INTERVAL, RateLimitedLogger};
use crate::resolve::TargetSpec;

/// What happened to one request for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// The `if` condition was false
    Skipped,
    /// Target is disabled in this worker
    Disabled,
    /// Row inserted inline
    Inserted,
    /// Row queued in the shared buffer
    Buffered,
    /// Row queued and the buffer flushed inline
    Flushed,
    /// Insert or flush handed to a helper thread
    Submitted,
    /// Row lost: pool queue full or buffer unusable
    Dropped,
}

pub struct Target {
    index: usize,
    spec: Arc<TargetSpec>,
    db: Arc<Mutex<Database>>,
    flusher: Option<Arc<FlushCoordinator>>,
    pool: Option<Arc<InsertPool>>,
    enabled: AtomicBool,
    metrics: TargetMetrics,
    errors: RateLimitedLogger,
}

impl Target {
    /// `flusher` must share `db`
    pub fn new(
        index: usize,
        spec: Arc<TargetSpec>,
        db: Arc<Mutex<Database>>,
        flusher: Option<FlushCoordinator>,
        pool: Option<Arc<InsertPool>>,
    ) -> Self {
        let errors = RateLimitedLogger::new(spec.name.clone(), DEFAULT_LOG_INTERVAL);
        Self {
            index,
            spec,
            db,
            flusher: flusher.map(Arc::new),
            pool,
            enabled: AtomicBool::new(false),
            metrics: TargetMetrics::new(),
            errors,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[inline]
    pub fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Rows waiting in the shared buffer, across all workers
    pub fn buffered_rows(&self) -> Option<usize> {
        self.flusher.as_ref().map(|f| f.buffer().len())
    }

    /// Open the database and arm the flush timer
    ///
    /// A target whose database cannot be opened stays disabled in this
    /// worker; the others carry on.
    pub fn open(&self) -> bool {
        if let Err(e) = self.db.lock().init() {
            tracing::error!(
                target_name = %self.spec.name,
                pid = std::process::id(),
                error = %e,
                "failed to open database, target disabled for this worker"
            );
            return false;
        }

        self.enabled.store(true, Ordering::Release);
        if let Some(flusher) = &self.flusher {
            flusher.start_timer();
        }
        tracing::info!(
            target_name = %self.spec.name,
            table = %self.spec.schema.table(),
            buffered = self.flusher.is_some(),
            "target ready"
        );
        true
    }

    /// Log one finished request
    pub fn log(&self, request: &dyn RequestContext) -> LogOutcome {
        self.metrics.record_request();

        if !self.is_enabled() {
            return LogOutcome::Disabled;
        }
        if let Some(condition) = &self.spec.condition
            && !condition.evaluate(request)
        {
            self.metrics.record_skipped();
            return LogOutcome::Skipped;
        }

        let row = self.spec.schema.build_row(request);
        match &self.flusher {
            Some(flusher) => self.buffer_row(flusher, row),
            None => self.insert_row(row),
        }
    }

    fn insert_row(&self, row: Row) -> LogOutcome {
        if let Some(pool) = &self.pool {
            let db = Arc::clone(&self.db);
            let submitted = pool.submit(self.index, move || {
                let mut db = db.lock();
                let result = db.insert(&row);
                TaskReport::Insert {
                    result,
                    recoveries: db.recoveries(),
                }
            });
            return match submitted {
                Ok(_) => LogOutcome::Submitted,
                Err(e) => {
                    self.metrics.record_dropped(1);
                    self.errors.error("insert task rejected, row dropped", &e);
                    LogOutcome::Dropped
                }
            };
        }

        let result = {
            let mut db = self.db.lock();
            let result = db.insert(&row);
            self.metrics.set_recoveries(db.recoveries());
            result
        };

        match result {
            Ok(()) => {
                self.metrics.record_inserted(1);
                LogOutcome::Inserted
            }
            Err(e) => {
                self.metrics.record_insert_error();
                self.disable(&e);
                LogOutcome::Disabled
            }
        }
    }

    fn buffer_row(&self, flusher: &Arc<FlushCoordinator>, row: Row) -> LogOutcome {
        let batch = match flusher.offer(row) {
            Ok(Offer::Buffered) => {
                self.metrics.record_buffered();
                return LogOutcome::Buffered;
            }
            Ok(Offer::Flush(batch)) => batch,
            Err(e) => {
                self.metrics.record_dropped(1);
                self.errors.error("shared buffer unusable, row dropped", &e);
                flusher.start_timer();
                return LogOutcome::Dropped;
            }
        };

        if batch.trigger == FlushTrigger::Full {
            self.metrics.record_buffered();
        }
        self.metrics.record_flush();
        tracing::debug!(
            target_name = %self.spec.name,
            trigger = %batch.trigger,
            rows = batch.rows.len(),
            "flushing shared buffer"
        );

        if let Some(pool) = &self.pool {
            let rows = batch.row_count() as u64;
            let store = Arc::clone(flusher);
            return match pool.submit(self.index, move || TaskReport::Flush(store.store(batch))) {
                Ok(_) => LogOutcome::Submitted,
                Err(e) => {
                    self.metrics.record_dropped(rows);
                    self.errors.error("flush task rejected, drained rows dropped", &e);
                    LogOutcome::Dropped
                }
            };
        }

        let report = flusher.store(batch);
        self.apply_flush(&report);
        match &report.insert {
            Ok(()) => LogOutcome::Flushed,
            Err(e) => {
                self.disable(e);
                LogOutcome::Disabled
            }
        }
    }

    /// Flush on timer expiry; failures are logged, never disabling
    pub fn flush_on_timer(&self) {
        if !self.is_enabled() {
            return;
        }
        let Some(flusher) = &self.flusher else {
            return;
        };

        let batch = match flusher.take(FlushTrigger::Timer) {
            Ok(Some(batch)) => batch,
            Ok(None) => return,
            Err(e) => {
                self.errors.error("timer flush could not drain shared buffer", &e);
                flusher.start_timer();
                return;
            }
        };
        self.metrics.record_flush();

        if let Some(pool) = &self.pool {
            let rows = batch.row_count() as u64;
            let store = Arc::clone(flusher);
            if let Err(e) = pool.submit(self.index, move || TaskReport::Flush(store.store(batch))) {
                self.metrics.record_dropped(rows);
                self.errors.error("flush task rejected, drained rows dropped", &e);
            }
            return;
        }

        let report = flusher.store(batch);
        if let Err(e) = &report.insert {
            self.errors.error("timer flush failed", e);
        }
        self.apply_flush(&report);
    }

    /// Account for a task finished on a helper thread
    pub fn complete(&self, report: TaskReport) {
        match report {
            TaskReport::Insert { result, recoveries } => {
                self.metrics.set_recoveries(recoveries);
                match result {
                    Ok(()) => self.metrics.record_inserted(1),
                    Err(e) => {
                        self.metrics.record_insert_error();
                        self.metrics.record_dropped(1);
                        self.errors.error("async insert failed", &e);
                    }
                }
            }
            TaskReport::Flush(report) => {
                if let Err(e) = &report.insert {
                    self.errors.error("async flush failed", e);
                }
                self.apply_flush(&report);
            }
        }
    }

    fn apply_flush(&self, report: &FlushReport) {
        self.metrics.set_recoveries(report.recoveries);
        self.metrics.record_inserted(report.rows_stored() as u64);
        self.metrics.record_dropped(report.rows_lost() as u64);
        if report.insert.is_err() {
            self.metrics.record_insert_error();
        }

        match &report.restore {
            Some(Ok(())) => self.metrics.record_buffered(),
            Some(Err(e)) => {
                self.errors.error("overflowing row could not be re-queued, dropped", e);
            }
            None => {}
        }
    }

    /// Drain, checkpoint and close on worker exit
    pub fn shutdown(&self, checkpoint: bool) {
        if let Some(flusher) = &self.flusher {
            flusher.stop_timer();
        }
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(flusher) = &self.flusher {
            match flusher.flush(FlushTrigger::Shutdown) {
                Ok(Some(report)) => {
                    self.metrics.record_flush();
                    if let Err(e) = &report.insert {
                        tracing::error!(
                            target_name = %self.spec.name,
                            rows = report.rows,
                            error = %e,
                            "failed to store buffered rows on exit"
                        );
                    }
                    self.apply_flush(&report);
                }
                Ok(None) => {
                    tracing::debug!(target_name = %self.spec.name, "shared buffer empty on exit");
                }
                Err(e) => {
                    tracing::error!(target_name = %self.spec.name, error = %e, "failed to drain shared buffer on exit");
                }
            }
        }

        let mut db = self.db.lock();
        if checkpoint {
            match db.checkpoint() {
                Ok(outcome) => {
                    tracing::debug!(target_name = %self.spec.name, ?outcome, "checkpoint on exit");
                }
                Err(e) => {
                    tracing::error!(target_name = %self.spec.name, error = %e, "wal checkpoint on exit failed");
                }
            }
        }
        if let Err(e) = db.close() {
            tracing::error!(target_name = %self.spec.name, error = %e, "failed to close database");
        }
    }

    /// Stop logging to this target in this worker
    fn disable(&self, error: &DbError) {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::error!(
            target_name = %self.spec.name,
            pid = std::process::id(),
            stage = ?error.stage(),
            error = %error,
            "insert failed, target disabled for this worker"
        );

        if let Some(flusher) = &self.flusher {
            flusher.stop_timer();
        }
        if let Err(e) = self.db.lock().close() {
            tracing::error!(target_name = %self.spec.name, error = %e, "failed to close database");
        }
    }

    pub(crate) fn stop_timer(&self) {
        if let Some(flusher) = &self.flusher {
            flusher.stop_timer();
        }
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("index", &self.index)
            .field("name", &self.spec.name)
            .field("enabled", &self.is_enabled())
            .field("buffered", &self.flusher.is_some())
            .field("pool", &self.pool.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}
