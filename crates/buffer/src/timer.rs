//! Per-worker flush timer
//!
//! One armed timer at most. When it elapses the owner's callback runs once;
//! the owner flushes and re-arms with [`FlushTimer::reset`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Callback run when the timer elapses
pub type FireFn = Arc<dyn Fn() + Send + Sync>;

pub struct FlushTimer {
    interval: Option<Duration>,
    runtime: Handle,
    on_fire: FireFn,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FlushTimer {
    /// Timer that never arms when `interval` is `None`
    pub fn new(interval: Option<Duration>, runtime: Handle, on_fire: FireFn) -> Self {
        Self {
            interval,
            runtime,
            on_fire,
            task: Mutex::new(None),
        }
    }

    #[inline]
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Arm the timer unless it is already armed
    pub fn start(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let on_fire = Arc::clone(&self.on_fire);
        *task = Some(self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            on_fire();
        }));
    }

    /// Disarm the timer; a callback already running is not interrupted
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Disarm, then arm for a full interval
    pub fn reset(&self) {
        self.stop();
        self.start();
    }

    pub fn is_armed(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FlushTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushTimer")
            .field("interval", &self.interval)
            .field("armed", &self.is_armed())
            .finish()
    }
}
