//! Flush coordination
//!
//! Every flush runs the same five steps, whatever triggered it:
//!
//! 1. lock the shared buffer
//! 2. drain it into process-local rows
//! 3. reset this worker's flush timer
//! 4. unlock
//! 5. insert the rows in one transaction
//!
//! The zone lock is never held across database I/O: steps 1-4 are
//! [`FlushCoordinator::offer`] or [`FlushCoordinator::take`], step 5 is
//! [`FlushCoordinator::store`], which may run on a helper thread.
//!
//! When a push fails because the arena is exhausted, the buffer is drained
//! in the same lock hold, and once the drained rows are stored the row that
//! did not fit is put back at the head of the queue.

use std::sync::Arc;

use parking_lot::Mutex;
use sqlitelog_buffer::{BufferError, FlushTimer, PushStatus, SharedBuffer};
use sqlitelog_store::{Database, DbError, Row};

/// Why a flush happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// A push reached the row limit
    Full,
    /// The flush timer elapsed
    Timer,
    /// A push found no room in the arena
    Overflow,
    /// Worker exit
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Timer => "timer",
            Self::Overflow => "overflow",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows drained from the shared buffer, not yet stored
#[derive(Debug)]
pub struct FlushBatch {
    pub trigger: FlushTrigger,
    pub rows: Vec<Row>,
    /// Row to put back at the head once `rows` are stored
    pub restore: Option<Row>,
}

impl FlushBatch {
    /// Rows this batch is responsible for, the pending one included
    pub fn row_count(&self) -> usize {
        self.rows.len() + usize::from(self.restore.is_some())
    }
}

/// Outcome of pushing a row
#[derive(Debug)]
pub enum Offer {
    /// Row queued, nothing to flush
    Buffered,
    /// Buffer drained, the batch must be stored
    Flush(FlushBatch),
}

/// Outcome of storing a batch
#[derive(Debug)]
pub struct FlushReport {
    pub trigger: FlushTrigger,
    pub rows: usize,
    pub insert: Result<(), DbError>,
    /// Result of putting the overflowing row back, if there was one and
    /// the insert succeeded
    pub restore: Option<Result<(), BufferError>>,
    /// Whether the batch carried an overflowing row
    pub had_pending: bool,
    /// Database recovery count after the insert
    pub recoveries: u64,
}

impl FlushReport {
    /// Rows committed by this flush
    pub fn rows_stored(&self) -> usize {
        if self.insert.is_ok() { self.rows } else { 0 }
    }

    /// Rows that neither reached the database nor went back to the buffer
    pub fn rows_lost(&self) -> usize {
        match (&self.insert, &self.restore) {
            (Err(_), _) => self.rows + usize::from(self.had_pending),
            (Ok(()), Some(Err(_))) => 1,
            _ => 0,
        }
    }
}

/// Runs the flush protocol for one buffered target in one worker
pub struct FlushCoordinator {
    buffer: SharedBuffer,
    timer: Option<FlushTimer>,
    db: Arc<Mutex<Database>>,
}

impl FlushCoordinator {
    pub fn new(buffer: SharedBuffer, timer: Option<FlushTimer>, db: Arc<Mutex<Database>>) -> Self {
        Self { buffer, timer, db }
    }

    #[inline]
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Arm the flush timer if it is not armed
    pub fn start_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.start();
        }
    }

    pub fn stop_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.stop();
        }
    }

    /// Steps 1-4 with a push in front
    ///
    /// A push that fills the buffer or finds no room drains it in the same
    /// lock hold.
    pub fn offer(&self, row: Row) -> Result<Offer, BufferError> {
        let mut locked = self.buffer.lock();

        let (trigger, restore) = match locked.push(&row) {
            Ok(PushStatus::Accepted) => return Ok(Offer::Buffered),
            Ok(PushStatus::Full) => (FlushTrigger::Full, None),
            Err(BufferError::Exhausted { needed }) => {
                tracing::debug!(needed, queued = locked.len(), "shared buffer exhausted, flushing");
                (FlushTrigger::Overflow, Some(row))
            }
            Err(e) => return Err(e),
        };

        let mut rows = Vec::with_capacity(locked.len());
        locked.drain_into(&mut rows)?;
        self.rearm(trigger);
        drop(locked);

        Ok(Offer::Flush(FlushBatch {
            trigger,
            rows,
            restore,
        }))
    }

    /// Steps 1-4 without a push
    ///
    /// `Ok(None)` when another worker already emptied the buffer; the timer
    /// is re-armed all the same.
    pub fn take(&self, trigger: FlushTrigger) -> Result<Option<FlushBatch>, BufferError> {
        let mut locked = self.buffer.lock();

        if locked.is_empty() {
            self.rearm(trigger);
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(locked.len());
        locked.drain_into(&mut rows)?;
        self.rearm(trigger);
        drop(locked);

        Ok(Some(FlushBatch {
            trigger,
            rows,
            restore: None,
        }))
    }

    /// Step 5: store a drained batch, then put back the overflowing row
    pub fn store(&self, batch: FlushBatch) -> FlushReport {
        let FlushBatch {
            trigger,
            rows,
            restore,
        } = batch;

        let (insert, recoveries) = {
            let mut db = self.db.lock();
            let insert = db.insert_batch(&rows);
            (insert, db.recoveries())
        };

        let had_pending = restore.is_some();
        let restore = match (&insert, restore) {
            (Ok(()), Some(row)) => Some(self.buffer.unshift(&row)),
            _ => None,
        };

        FlushReport {
            trigger,
            rows: rows.len(),
            insert,
            restore,
            had_pending,
            recoveries,
        }
    }

    /// All five steps on the calling thread
    pub fn flush(&self, trigger: FlushTrigger) -> Result<Option<FlushReport>, BufferError> {
        Ok(self.take(trigger)?.map(|batch| self.store(batch)))
    }

    fn rearm(&self, trigger: FlushTrigger) {
        match trigger {
            FlushTrigger::Shutdown => self.stop_timer(),
            _ => {
                if let Some(timer) = &self.timer {
                    timer.reset();
                }
            }
        }
    }
}

impl std::fmt::Debug for FlushCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushCoordinator")
            .field("buffer", &self.buffer)
            .field("timer", &self.timer)
            .finish()
    }
}

#[cfg(test)]
#[path = "flush_test.rs"]
mod flush_test;
