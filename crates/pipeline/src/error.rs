//! Pipeline error types

use std::io;

use thiserror::Error;

use sqlitelog_buffer::ZoneError;
use sqlitelog_config::ConfigError;
use sqlitelog_store::{DbError, SchemaError};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Format columns could not be turned into a table
    #[error("format '{format}': {message}")]
    Format { format: String, message: String },

    #[error("format '{format}': {source}")]
    Schema {
        format: String,
        #[source]
        source: SchemaError,
    },

    /// Init script could not be read
    #[error("target '{target}': cannot read init script '{path}': {source}")]
    InitScript {
        target: String,
        path: String,
        #[source]
        source: io::Error,
    },

    /// Schema or init script rejected by SQLite
    #[error("target '{target}': {source}")]
    Probe {
        target: String,
        #[source]
        source: DbError,
    },

    /// Shared zone could not be created or attached
    #[error("target '{target}': {source}")]
    Zone {
        target: String,
        #[source]
        source: ZoneError,
    },

    /// Two buffered targets would share one zone file
    #[error("target '{target}': shared zone '{path}' is already used by another target")]
    DuplicateZone { target: String, path: String },

    /// Shared zone directory could not be created
    #[error("cannot create shared zone directory '{path}': {source}")]
    ZoneDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Worker started outside a tokio runtime
    #[error("worker must be started inside a tokio runtime")]
    NoRuntime,
}

/// Helper thread pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every queue slot is taken
    #[error("thread pool '{pool}' queue is full ({max_queue} tasks)")]
    QueueFull { pool: String, max_queue: usize },

    #[error("thread pool '{pool}' is shut down")]
    ShutDown { pool: String },

    #[error("thread pool '{pool}': cannot spawn thread: {source}")]
    Spawn {
        pool: String,
        #[source]
        source: io::Error,
    },
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
