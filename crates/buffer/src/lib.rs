//! sqlitelog shared buffering
//!
//! Rows waiting to be flushed live in a memory-mapped zone shared by every
//! worker process, so any worker can drain what the others queued.
//!
//! - [`SharedZone`]: the mapping, its process-shared lock and arena
//! - [`SharedBuffer`]: FIFO queue of rows in a zone, with `unshift` to put
//!   an overflowing row back at the front
//! - [`FlushTimer`]: per-worker timer that asks for a flush

pub mod error;
pub mod queue;
pub mod timer;
pub mod zone;

pub use error::{BufferError, ZoneError};
pub use queue::{LockedBuffer, PushStatus, SharedBuffer};
pub use timer::{FireFn, FlushTimer};
pub use zone::{HEADER_SIZE, MIN_ZONE_SIZE, SharedZone, ZoneGuard, ZoneStats};
