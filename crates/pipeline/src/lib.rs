//! sqlitelog pipeline
//!
//! Connects finished requests to SQLite tables through optional shared
//! buffers and helper thread pools.
//!
//! # Architecture
//!
//! ```text
//!                    ┌── unbuffered ──────────────→ Database::insert
//! request ──→ Target ┼── buffered ──→ SharedBuffer ──(full/overflow/timer)──→ insert_batch
//!                    └── async ─────→ InsertPool thread ──→ WorkerEvent::TaskDone
//! ```
//!
//! # Key Design
//!
//! - **Shared buffer**: one queue per target in a file-backed zone, shared
//!   by every worker process
//! - **Lock scope**: the zone lock covers push and drain only, never
//!   database I/O
//! - **Failure isolation**: an inline insert failure disables that target
//!   in that worker; the other targets keep logging
//! - **Bounded helpers**: pool queues never block the request path; a full
//!   queue drops the task and counts the rows
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sqlitelog_pipeline::{Worker, prepare_zones, resolve};
//! use tokio_util::sync::CancellationToken;
//!
//! let resolved = Arc::new(resolve(&config)?);
//! prepare_zones(&resolved)?;
//!
//! let worker = Worker::start(Arc::clone(&resolved))?;
//! let handle = worker.handle();
//! let shutdown = CancellationToken::new();
//! let done = tokio::spawn(worker.run(shutdown.clone()));
//!
//! handle.log(&request);
//!
//! shutdown.cancel();
//! let summaries = done.await?;
//! ```

mod error;
mod event;
mod flush;
mod metrics;
mod pool;
mod rate_limit;
mod resolve;
mod target;
mod worker;

pub use error::{PipelineError, PoolError, Result};
pub use event::{TaskCompletion, TaskReport, WorkerEvent};
pub use flush::{FlushBatch, FlushCoordinator, FlushReport, FlushTrigger, Offer};
pub use metrics::{MetricsSnapshot, TargetMetrics};
pub use pool::{InsertPool, TaskHandle};
pub use rate_limit::{DEFAULT_LOG_INTERVAL, RateLimitedLogger};
pub use resolve::{BufferSpec, ResolvedConfig, TargetSpec, build_schema, resolve, zone_file_name};
pub use target::{LogOutcome, Target};
pub use worker::{TargetSummary, Worker, WorkerHandle, prepare_zones, release_dead_worker};
