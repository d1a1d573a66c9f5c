//! Helper thread pools
//!
//! Inserts of `async` targets run on a named pool of OS threads so the
//! request path never waits on SQLite. Tasks go through a bounded channel;
//! a full queue rejects the task instead of blocking. Each finished task is
//! reported to the owning worker as a [`WorkerEvent::TaskDone`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use sqlitelog_config::ThreadPoolConfig;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::PoolError;
use crate::event::{TaskCompletion, TaskReport, WorkerEvent};

type Job = Box<dyn FnOnce() -> TaskReport + Send + 'static>;

struct Task {
    id: u64,
    target: usize,
    job: Job,
}

/// Identifies a submitted task in its completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    id: u64,
}

impl TaskHandle {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Named pool of insert threads owned by one worker
pub struct InsertPool {
    name: Arc<str>,
    max_queue: usize,
    sender: Mutex<Option<Sender<Task>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl InsertPool {
    /// Start `config.threads` threads reporting to `events`
    pub fn start(
        name: &str,
        config: &ThreadPoolConfig,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Self, PoolError> {
        let (sender, receiver) = crossbeam_channel::bounded::<Task>(config.max_queue);
        let name: Arc<str> = Arc::from(name);

        let mut threads = Vec::with_capacity(config.threads);
        for i in 0..config.threads {
            let receiver = receiver.clone();
            let events = events.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sqlitelog-{name}-{i}"))
                .spawn(move || run_thread(receiver, events))
                .map_err(|source| PoolError::Spawn {
                    pool: name.to_string(),
                    source,
                })?;
            threads.push(handle);
        }

        tracing::debug!(pool = %name, threads = config.threads, max_queue = config.max_queue, "thread pool started");

        Ok(Self {
            name,
            max_queue: config.max_queue,
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(threads),
            next_id: AtomicU64::new(1),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job for `target`; never blocks
    pub fn submit<F>(&self, target: usize, job: F) -> Result<TaskHandle, PoolError>
    where
        F: FnOnce() -> TaskReport + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(PoolError::ShutDown {
                pool: self.name.to_string(),
            });
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Task {
            id,
            target,
            job: Box::new(job),
        };

        match sender.try_send(task) {
            Ok(()) => Ok(TaskHandle { id }),
            Err(TrySendError::Full(_)) => Err(PoolError::QueueFull {
                pool: self.name.to_string(),
                max_queue: self.max_queue,
            }),
            Err(TrySendError::Disconnected(_)) => Err(PoolError::ShutDown {
                pool: self.name.to_string(),
            }),
        }
    }

    /// Tasks waiting for a thread
    pub fn queued(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    /// Stop accepting tasks, run what is queued, and join every thread
    ///
    /// Blocks until the queue is empty. Calling it twice is a no-op.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        let threads = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!(pool = %self.name, "thread pool thread panicked");
            }
        }
        tracing::debug!(pool = %self.name, "thread pool stopped");
    }
}

impl Drop for InsertPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for InsertPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsertPool")
            .field("name", &self.name)
            .field("max_queue", &self.max_queue)
            .finish()
    }
}

fn run_thread(receiver: Receiver<Task>, events: UnboundedSender<WorkerEvent>) {
    // recv keeps returning queued tasks after the sender is gone
    while let Ok(task) = receiver.recv() {
        let report = (task.job)();
        let completion = TaskCompletion {
            task: task.id,
            target: task.target,
            report,
        };
        // the worker may already be gone during shutdown
        let _ = events.send(WorkerEvent::TaskDone(completion));
    }
}
