//! Storage engine
//!
//! One [`Database`] owns one SQLite connection for one target in one worker
//! process. Connections are never shared across processes.
//!
//! # Insert protocol
//!
//! - single row: prepare, bind every column in schema order, step, finalize.
//!   The first failure among prepare/bind/step is reported; a finalize
//!   failure only surfaces when everything before it succeeded.
//! - batch: `BEGIN EXCLUSIVE`, the single-row protocol per row stopping at
//!   the first failure, then `COMMIT` or `ROLLBACK`. A row failure takes
//!   priority over a commit/rollback failure.
//!
//! # Recovery
//!
//! When an insert fails because the database file was moved or deleted
//! under the open connection, the connection is reopened (recreating the
//! file and table) and the insert retried exactly once.
//!
//! # Checkpoints
//!
//! `wal_checkpoint(TRUNCATE)` does not wait on the busy timeout, so
//! [`Database::checkpoint`] polls with 50-150ms jittered sleeps until the
//! configured busy timeout is used up. A checkpoint still busy after that
//! is logged and treated as done.

mod error;

pub use error::{DbError, SQLITE_READONLY_DBMOVED, Stage};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rusqlite::types::{Null, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, Statement};

use crate::row::Row;
use crate::schema::{BindStrategy, TableSchema};

/// Default SQLite busy timeout for ordinary writes
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Which failures trigger a reopen-and-retry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// File moved or deleted, on both insert paths
    #[default]
    FileMoved,
    /// Batch inserts also retry failures without an extended result code
    FileMovedOrUnclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertPath {
    Single,
    Batch,
}

/// Result of a checkpoint request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Journal is not in WAL mode, nothing to do
    NotWal,
    Completed {
        log_frames: i64,
        checkpointed_frames: i64,
    },
    /// Still blocked after the busy timeout; another process may have
    /// finished the checkpoint
    StillBusy { slept: Duration },
}

impl CheckpointOutcome {
    /// Frames moved back into the database file
    pub fn checkpointed_frames(&self) -> i64 {
        match self {
            Self::Completed {
                checkpointed_frames,
                ..
            } => *checkpointed_frames,
            _ => 0,
        }
    }
}

/// One connection to one target's database file
pub struct Database {
    path: PathBuf,
    /// Display form of `path` for errors and log fields
    name: String,
    schema: Arc<TableSchema>,
    init_sql: Option<Arc<str>>,
    busy_timeout: Duration,
    recovery: RecoveryPolicy,
    conn: Option<Connection>,
    recoveries: u64,
}

impl Database {
    /// A closed database; call [`Database::init`] to open it
    pub fn new(path: impl Into<PathBuf>, schema: Arc<TableSchema>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self {
            path,
            name,
            schema,
            init_sql: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            recovery: RecoveryPolicy::default(),
            conn: None,
            recoveries: 0,
        }
    }

    /// SQL run once after the table is created
    pub fn with_init_sql(mut self, sql: Option<Arc<str>>) -> Self {
        self.init_sql = sql;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_recovery(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery = policy;
        self
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Times the connection was reopened after the file moved
    #[inline]
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    /// Open (creating if missing) and prepare the table
    ///
    /// Any open connection is closed first. On error the database is left
    /// closed, never half-initialized.
    pub fn init(&mut self) -> Result<()> {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.name, error = %e, "failed to close connection before reopening");
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DbError::sqlite(Stage::Open, &self.name, e))?;

        prepare_connection(&conn, &self.schema, self.init_sql.as_deref(), self.busy_timeout)
            .map_err(|(stage, e)| DbError::sqlite(stage, &self.name, e))?;

        tracing::debug!(path = %self.name, table = %self.schema.table(), "database opened");
        self.conn = Some(conn);
        Ok(())
    }

    /// Run the schema and init script against an in-memory database
    ///
    /// Used at configuration time to reject broken formats and scripts
    /// before any worker opens a file.
    pub fn probe(schema: &TableSchema, init_sql: Option<&str>) -> Result<()> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DbError::sqlite(Stage::Open, ":memory:", e))?;
        prepare_connection(&conn, schema, init_sql, DEFAULT_BUSY_TIMEOUT)
            .map_err(|(stage, e)| DbError::sqlite(stage, ":memory:", e))
    }

    /// Close the connection; closing a closed database is a no-op
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| DbError::sqlite(Stage::Close, &self.name, e))?;
            tracing::debug!(path = %self.name, "database closed");
        }
        Ok(())
    }

    /// Insert one row outside any explicit transaction
    pub fn insert(&mut self, row: &Row) -> Result<()> {
        self.recovering(InsertPath::Single, |db| db.insert_once(row))
    }

    /// Insert all rows in one exclusive transaction
    ///
    /// Either every row is committed or none is.
    pub fn insert_batch(&mut self, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.recovering(InsertPath::Batch, |db| db.insert_batch_once(rows))
    }

    fn recovering<F>(&mut self, path: InsertPath, op: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        let policy = self.recovery;
        retry_once(
            self,
            op,
            |e| should_recover(policy, path, e),
            |db, e| {
                tracing::warn!(path = %db.name, error = %e, "database file moved, reopening");
                db.recoveries += 1;
                db.init()
            },
        )
    }

    fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| DbError::NotOpen {
            path: self.name.clone(),
        })
    }

    fn check_width(&self, row: &Row) -> Result<()> {
        if row.len() < self.schema.width() {
            return Err(DbError::RowWidth {
                path: self.name.clone(),
                expected: self.schema.width(),
                got: row.len(),
            });
        }
        Ok(())
    }

    fn insert_once(&mut self, row: &Row) -> Result<()> {
        let conn = self.connection()?;
        self.check_width(row)?;
        insert_row(conn, &self.schema, row).map_err(|(stage, e)| DbError::sqlite(stage, &self.name, e))
    }

    fn insert_batch_once(&mut self, rows: &[Row]) -> Result<()> {
        let conn = self.connection()?;

        conn.execute_batch("BEGIN EXCLUSIVE TRANSACTION")
            .map_err(|e| DbError::sqlite(Stage::Begin, &self.name, e))?;

        let mut inserted = Ok(());
        for (index, row) in rows.iter().enumerate() {
            let result = self.check_width(row).and_then(|()| {
                insert_row(conn, &self.schema, row)
                    .map_err(|(stage, e)| DbError::sqlite(stage, &self.name, e))
            });
            if let Err(e) = result {
                tracing::debug!(path = %self.name, row = index, error = %e, "batch row failed");
                inserted = Err(e);
                break;
            }
        }

        let finished = if inserted.is_ok() {
            conn.execute_batch("COMMIT")
                .map_err(|e| DbError::sqlite(Stage::Commit, &self.name, e))
        } else {
            conn.execute_batch("ROLLBACK")
                .map_err(|e| DbError::sqlite(Stage::Rollback, &self.name, e))
        };

        if !conn.is_autocommit() {
            // COMMIT failed (e.g. busy); do not leave the transaction open
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(path = %self.name, error = %e, "failed to roll back unfinished transaction");
            }
        }

        inserted.and(finished)
    }

    /// Fold the write-ahead log back into the database file
    pub fn checkpoint(&mut self) -> Result<CheckpointOutcome> {
        let conn = self.connection()?;

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |r| r.get(0))
            .map_err(|e| DbError::sqlite(Stage::JournalMode, &self.name, e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            return Ok(CheckpointOutcome::NotWal);
        }

        let timeout_ms: i64 = conn
            .pragma_query_value(None, "busy_timeout", |r| r.get(0))
            .map_err(|e| DbError::sqlite(Stage::BusyTimeout, &self.name, e))?;
        let budget = Duration::from_millis(u64::try_from(timeout_ms).unwrap_or(0));

        let mut rng = rand::thread_rng();
        let mut slept = Duration::ZERO;
        loop {
            match truncate_checkpoint(conn) {
                Ok(Some((log_frames, checkpointed_frames))) => {
                    tracing::debug!(path = %self.name, log_frames, checkpointed_frames, "wal checkpoint complete");
                    return Ok(CheckpointOutcome::Completed {
                        log_frames,
                        checkpointed_frames,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    let err = DbError::sqlite(Stage::Checkpoint, &self.name, e);
                    if !err.is_busy() {
                        return Err(err);
                    }
                }
            }

            if slept >= budget {
                tracing::warn!(
                    path = %self.name,
                    slept_ms = slept.as_millis() as u64,
                    "wal checkpoint still busy, giving up"
                );
                return Ok(CheckpointOutcome::StillBusy { slept });
            }

            let pause = Duration::from_millis(rng.gen_range(50..=150));
            std::thread::sleep(pause);
            slept += pause;
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.name, error = %e, "failed to close database on drop");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("table", &self.schema.table())
            .field("open", &self.conn.is_some())
            .field("recoveries", &self.recoveries)
            .finish()
    }
}

fn should_recover(policy: RecoveryPolicy, path: InsertPath, err: &DbError) -> bool {
    if err.is_file_moved() {
        return true;
    }
    path == InsertPath::Batch
        && policy == RecoveryPolicy::FileMovedOrUnclassified
        && err.is_unclassified()
}

/// Run `op`; if it fails with a recoverable error, run `recover` and `op`
/// once more. The second result is returned as-is.
fn retry_once<S, E, Op, Check, Recover>(
    state: &mut S,
    mut op: Op,
    recoverable: Check,
    recover: Recover,
) -> std::result::Result<(), E>
where
    Op: FnMut(&mut S) -> std::result::Result<(), E>,
    Check: Fn(&E) -> bool,
    Recover: FnOnce(&mut S, &E) -> std::result::Result<(), E>,
{
    match op(state) {
        Err(e) if recoverable(&e) => {
            recover(state, &e)?;
            op(state)
        }
        other => other,
    }
}

fn prepare_connection(
    conn: &Connection,
    schema: &TableSchema,
    init_sql: Option<&str>,
    busy_timeout: Duration,
) -> std::result::Result<(), (Stage, rusqlite::Error)> {
    conn.busy_timeout(busy_timeout)
        .map_err(|e| (Stage::BusyTimeout, e))?;
    conn.execute_batch(schema.create_sql())
        .map_err(|e| (Stage::CreateTable, e))?;
    if let Some(sql) = init_sql {
        conn.execute_batch(sql).map_err(|e| (Stage::InitScript, e))?;
    }
    Ok(())
}

fn insert_row(
    conn: &Connection,
    schema: &TableSchema,
    row: &Row,
) -> std::result::Result<(), (Stage, rusqlite::Error)> {
    let mut stmt = conn
        .prepare(schema.insert_sql())
        .map_err(|e| (Stage::Prepare, e))?;

    let executed = bind_row(&mut stmt, schema, row).and_then(|()| {
        stmt.raw_execute()
            .map(|_| ())
            .map_err(|e| (Stage::Step, e))
    });
    let finalized = stmt.finalize().map_err(|e| (Stage::Finalize, e));

    executed.and(finalized)
}

fn bind_row(
    stmt: &mut Statement<'_>,
    schema: &TableSchema,
    row: &Row,
) -> std::result::Result<(), (Stage, rusqlite::Error)> {
    for (index, value) in row.values().iter().enumerate() {
        let position = index + 1;
        // Values past the last column have no strategy; SQLite rejects them
        let strategy = schema
            .columns()
            .get(index)
            .map_or(BindStrategy::Text, |c| c.bind_strategy());

        let bound = match (value.as_deref(), strategy) {
            (None, _) => stmt.raw_bind_parameter(position, Null),
            (Some(bytes), BindStrategy::Text) => {
                stmt.raw_bind_parameter(position, ToSqlOutput::Borrowed(ValueRef::Text(bytes)))
            }
            (Some(bytes), BindStrategy::Blob) => {
                stmt.raw_bind_parameter(position, ToSqlOutput::Borrowed(ValueRef::Blob(bytes)))
            }
        };
        bound.map_err(|e| (Stage::Bind(position), e))?;
    }
    Ok(())
}

/// `Some((log, checkpointed))` when done, `None` when blocked
fn truncate_checkpoint(conn: &Connection) -> rusqlite::Result<Option<(i64, i64)>> {
    let (busy, log, checkpointed): (i64, i64, i64) =
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })?;
    Ok((busy == 0).then_some((log, checkpointed)))
}
