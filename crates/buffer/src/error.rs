//! Buffer and zone errors

use std::io;

use thiserror::Error;

/// Shared zone errors
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("shared zone '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("shared zone size {size} is below the minimum of {min}")]
    TooSmall { size: usize, min: usize },

    /// File exists but does not hold a zone of this layout
    #[error("shared zone '{path}' is not valid: {reason}")]
    Invalid { path: String, reason: &'static str },

    /// An offset read from shared memory points outside the zone
    #[error("shared zone corrupted at offset {offset}")]
    Corrupted { offset: usize },
}

impl ZoneError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Shared buffer errors
#[derive(Debug, Error)]
pub enum BufferError {
    /// No free block large enough for the row; nothing was linked
    #[error("shared buffer exhausted, {needed} bytes needed")]
    Exhausted { needed: usize },

    /// The queue was unreadable; the zone has been reset
    #[error("shared buffer corrupted: {0}")]
    Corrupted(#[from] ZoneError),
}

impl BufferError {
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
