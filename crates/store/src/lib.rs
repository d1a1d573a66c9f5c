//! sqlitelog storage
//!
//! Everything between a finished request and a row in SQLite, minus the
//! buffering:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `row` | [`Row`]: ordered optional byte strings |
//! | `value` | [`ValueSource`] per-column providers over a [`RequestContext`] |
//! | `schema` | [`ColumnSpec`] and [`TableSchema`] with derived SQL |
//! | `db` | [`Database`]: connection lifecycle, inserts, checkpoints |

pub mod db;
pub mod row;
pub mod schema;
pub mod value;

pub use db::{
    CheckpointOutcome, DEFAULT_BUSY_TIMEOUT, Database, DbError, RecoveryPolicy,
    SQLITE_READONLY_DBMOVED, Stage,
};
pub use row::{MAX_FIELD_LEN, Row};
pub use schema::{BindStrategy, ColumnSpec, ColumnType, SchemaError, TableSchema};
pub use value::{Condition, RequestContext, RequestRecord, ValueSource};
