//! Per-target metrics
//!
//! Atomic counters, relaxed ordering. Values are eventually consistent and
//! per worker process.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one target in one worker
#[derive(Debug, Default)]
pub struct TargetMetrics {
    /// Requests seen, including skipped ones
    requests: AtomicU64,

    /// Requests rejected by the `if` condition
    skipped: AtomicU64,

    /// Rows committed to the database by this worker
    rows_inserted: AtomicU64,

    /// Rows queued in the shared buffer
    rows_buffered: AtomicU64,

    /// Buffer drains that carried rows
    flushes: AtomicU64,

    /// Rows lost to a full pool queue, an unplaceable row or a corrupted buffer
    rows_dropped: AtomicU64,

    /// Failed single inserts and batches
    insert_errors: AtomicU64,

    /// Database reopened after its file moved
    recoveries: AtomicU64,
}

impl TargetMetrics {
    #[inline]
    pub const fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            rows_inserted: AtomicU64::new(0),
            rows_buffered: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            rows_dropped: AtomicU64::new(0),
            insert_errors: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_inserted(&self, rows: u64) {
        self.rows_inserted.fetch_add(rows, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_buffered(&self) {
        self.rows_buffered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self, rows: u64) {
        self.rows_dropped.fetch_add(rows, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_insert_error(&self) {
        self.insert_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the recovery count from the database's own counter
    #[inline]
    pub fn set_recoveries(&self, total: u64) {
        self.recoveries.store(total, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            rows_buffered: self.rows_buffered.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            insert_errors: self.insert_errors.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TargetMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub skipped: u64,
    pub rows_inserted: u64,
    pub rows_buffered: u64,
    pub flushes: u64,
    pub rows_dropped: u64,
    pub insert_errors: u64,
    pub recoveries: u64,
}

impl MetricsSnapshot {
    /// Difference from an earlier snapshot
    pub fn diff(&self, previous: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.saturating_sub(previous.requests),
            skipped: self.skipped.saturating_sub(previous.skipped),
            rows_inserted: self.rows_inserted.saturating_sub(previous.rows_inserted),
            rows_buffered: self.rows_buffered.saturating_sub(previous.rows_buffered),
            flushes: self.flushes.saturating_sub(previous.flushes),
            rows_dropped: self.rows_dropped.saturating_sub(previous.rows_dropped),
            insert_errors: self.insert_errors.saturating_sub(previous.insert_errors),
            recoveries: self.recoveries.saturating_sub(previous.recoveries),
        }
    }
}
