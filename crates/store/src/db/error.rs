//! Storage engine errors

use std::fmt;

use rusqlite::ffi;
use thiserror::Error;

/// Extended result code for "the database file was moved, renamed or
/// deleted while open"
pub const SQLITE_READONLY_DBMOVED: i32 = ffi::SQLITE_READONLY | (4 << 8);

/// Step of a storage operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    BusyTimeout,
    CreateTable,
    InitScript,
    Prepare,
    /// Binding the 1-based parameter
    Bind(usize),
    Step,
    Finalize,
    Begin,
    Commit,
    Rollback,
    JournalMode,
    Checkpoint,
    Close,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::BusyTimeout => f.write_str("busy timeout"),
            Self::CreateTable => f.write_str("create table"),
            Self::InitScript => f.write_str("init script"),
            Self::Prepare => f.write_str("prepare"),
            Self::Bind(position) => write!(f, "bind of parameter {position}"),
            Self::Step => f.write_str("step"),
            Self::Finalize => f.write_str("finalize"),
            Self::Begin => f.write_str("begin transaction"),
            Self::Commit => f.write_str("commit"),
            Self::Rollback => f.write_str("rollback"),
            Self::JournalMode => f.write_str("journal mode query"),
            Self::Checkpoint => f.write_str("wal checkpoint"),
            Self::Close => f.write_str("close"),
        }
    }
}

/// Storage engine errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite rejected a step
    #[error("{stage} failed for '{path}': {source}")]
    Sqlite {
        stage: Stage,
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Operation on a closed connection
    #[error("database '{path}' is not open")]
    NotOpen { path: String },

    /// Row has fewer values than the table has columns
    #[error("row for '{path}' has {got} values, table has {expected} columns")]
    RowWidth {
        path: String,
        expected: usize,
        got: usize,
    },
}

impl DbError {
    pub(crate) fn sqlite(stage: Stage, path: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Sqlite {
            stage,
            path: path.into(),
            source,
        }
    }

    /// Failing stage, if SQLite reported the error
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Sqlite { stage, .. } => Some(*stage),
            Self::RowWidth { .. } | Self::NotOpen { .. } => None,
        }
    }

    /// SQLite extended result code
    pub fn extended_code(&self) -> Option<i32> {
        match self {
            Self::Sqlite {
                source: rusqlite::Error::SqliteFailure(e, _),
                ..
            } => Some(e.extended_code),
            _ => None,
        }
    }

    /// The file under the open connection no longer matches what was opened
    pub fn is_file_moved(&self) -> bool {
        self.extended_code() == Some(SQLITE_READONLY_DBMOVED)
    }

    /// SQLite-side failure that carries no extended result code
    pub fn is_unclassified(&self) -> bool {
        matches!(self, Self::Sqlite { .. }) && self.extended_code().is_none()
    }

    /// Lock contention outlasted the busy timeout
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Sqlite {
                source: rusqlite::Error::SqliteFailure(
                    ffi::Error {
                        code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                        ..
                    },
                    _
                ),
                ..
            }
        )
    }
}
