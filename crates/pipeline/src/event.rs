//! Messages delivered to a worker's event loop

use sqlitelog_store::DbError;

use crate::flush::FlushReport;

/// Event for [`crate::Worker::run`]
#[derive(Debug)]
pub enum WorkerEvent {
    /// A target's flush timer elapsed
    FlushDue { target: usize },
    /// A helper thread finished a task
    TaskDone(TaskCompletion),
}

/// Result of a task run on a helper thread
#[derive(Debug)]
pub struct TaskCompletion {
    pub task: u64,
    pub target: usize,
    pub report: TaskReport,
}

/// What a helper task did
#[derive(Debug)]
pub enum TaskReport {
    /// Single-row insert of an unbuffered target
    Insert {
        result: Result<(), DbError>,
        recoveries: u64,
    },
    /// Store step of a flush
    Flush(FlushReport),
}
