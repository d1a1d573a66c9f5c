//! Rate-limited error logging
//!
//! A target that keeps failing (disk full, a locked database) would
//! otherwise log once per request. Errors are logged at most once per
//! interval with a count of what was suppressed in between.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Minimum time between two logged errors of one target
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

pub struct RateLimitedLogger {
    target: String,
    min_interval: Duration,
    last_logged: Mutex<Option<Instant>>,
    /// Errors since the last logged one
    pending: AtomicU64,
    total: AtomicU64,
}

impl RateLimitedLogger {
    pub fn new(target: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            target: target.into(),
            min_interval,
            last_logged: Mutex::new(None),
            pending: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Record an error; returns true if it was logged
    pub fn error(&self, message: &str, error: &dyn std::fmt::Display) -> bool {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);

        if !self.due() {
            return false;
        }

        let count = self.pending.swap(0, Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        if count > 1 {
            tracing::error!(
                target_name = %self.target,
                error = %error,
                suppressed = count - 1,
                total_errors = total,
                "{message} (rate-limited)"
            );
        } else {
            tracing::error!(
                target_name = %self.target,
                error = %error,
                total_errors = total,
                "{message}"
            );
        }
        true
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn due(&self) -> bool {
        let mut last = self.last_logged.lock();
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl std::fmt::Debug for RateLimitedLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedLogger")
            .field("target", &self.target)
            .field("total", &self.total())
            .finish()
    }
}
