//! Table schemas
//!
//! A [`TableSchema`] is built once from a format declaration and shared
//! read-only by every connection and thread. Column order defines both the
//! `CREATE TABLE` column order and the positional bind order of the
//! `INSERT` statement.

use std::fmt;

use thiserror::Error;

use crate::row::Row;
use crate::value::{RequestContext, ValueSource};

/// Declared SQL type of a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
    /// Any other type name, passed through to SQLite as written
    Other(String),
}

impl ColumnType {
    /// Parse a declared type name, case-insensitively for the known ones
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "TEXT" => Self::Text,
            "INTEGER" => Self::Integer,
            "REAL" => Self::Real,
            "BLOB" => Self::Blob,
            _ => Self::Other(name.to_string()),
        }
    }

    /// Type for a column declared without one
    pub fn infer(column: &str) -> Self {
        match column {
            "binary_remote_addr" => Self::Blob,

            "body_bytes_sent"
            | "bytes_sent"
            | "connection"
            | "connection_requests"
            | "connections_active"
            | "connections_reading"
            | "connections_waiting"
            | "connections_writing"
            | "content_length"
            | "limit_rate"
            | "pid"
            | "proxy_port"
            | "proxy_protocol_port"
            | "proxy_protocol_server_port"
            | "remote_port"
            | "server_port"
            | "status" => Self::Integer,

            "connection_time" | "gzip_ratio" | "msec" | "request_time" => Self::Real,

            _ => Self::Text,
        }
    }

    pub fn as_sql(&self) -> &str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
            Self::Other(name) => name,
        }
    }

    /// BLOB columns bind raw bytes, everything else binds text
    pub fn bind_strategy(&self) -> BindStrategy {
        match self {
            Self::Blob => BindStrategy::Blob,
            _ => BindStrategy::Text,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// How a column's bytes are bound to the insert statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStrategy {
    Text,
    Blob,
}

/// One column: name, type and value provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    name: String,
    sql_type: ColumnType,
    source: ValueSource,
}

impl ColumnSpec {
    /// Column reading the request variable of the same name
    ///
    /// The type is inferred from the name when not declared.
    pub fn new(name: impl Into<String>, sql_type: Option<ColumnType>) -> Self {
        let name = name.into();
        let sql_type = sql_type.unwrap_or_else(|| ColumnType::infer(&name));
        let escape = sql_type.bind_strategy() == BindStrategy::Text;
        let source = ValueSource::for_variable(&name, escape);
        Self {
            name,
            sql_type,
            source,
        }
    }

    /// Column with an explicit value provider
    pub fn with_source(name: impl Into<String>, sql_type: ColumnType, source: ValueSource) -> Self {
        Self {
            name: name.into(),
            sql_type,
            source,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn sql_type(&self) -> &ColumnType {
        &self.sql_type
    }

    #[inline]
    pub fn source(&self) -> &ValueSource {
        &self.source
    }

    #[inline]
    pub fn bind_strategy(&self) -> BindStrategy {
        self.sql_type.bind_strategy()
    }
}

/// Schema construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table '{0}' has no columns")]
    NoColumns(String),
}

/// Ordered columns of one table plus the statements derived from them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    columns: Vec<ColumnSpec>,
    create_sql: String,
    insert_sql: String,
}

impl TableSchema {
    /// Build a schema, deriving the CREATE and INSERT statements
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::NoColumns` for an empty column list.
    pub fn new(table: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self, SchemaError> {
        let table = table.into();
        if columns.is_empty() {
            return Err(SchemaError::NoColumns(table));
        }

        let definitions = columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.sql_type))
            .collect::<Vec<_>>()
            .join(", ");
        let create_sql = format!("CREATE TABLE IF NOT EXISTS {table} ({definitions})");

        let placeholders = vec!["?"; columns.len()].join(",");
        let insert_sql = format!("INSERT INTO {table} VALUES ({placeholders})");

        Ok(Self {
            table,
            columns,
            create_sql,
            insert_sql,
        })
    }

    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[inline]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    #[inline]
    pub fn create_sql(&self) -> &str {
        &self.create_sql
    }

    #[inline]
    pub fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    /// Number of columns, also the number of insert placeholders
    #[inline]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Evaluate every column against a request, in order
    pub fn build_row(&self, request: &dyn RequestContext) -> Row {
        self.columns
            .iter()
            .map(|c| c.source.evaluate(request))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RequestRecord;

    fn schema(columns: &[(&str, Option<&str>)]) -> TableSchema {
        let columns = columns
            .iter()
            .map(|(name, ty)| ColumnSpec::new(*name, ty.map(ColumnType::parse)))
            .collect();
        TableSchema::new("t", columns).unwrap()
    }

    #[test]
    fn test_statements() {
        let s = schema(&[("remote_addr", None), ("status", None), ("request_time", None)]);
        assert_eq!(
            s.create_sql(),
            "CREATE TABLE IF NOT EXISTS t (remote_addr TEXT, status INTEGER, request_time REAL)"
        );
        assert_eq!(s.insert_sql(), "INSERT INTO t VALUES (?,?,?)");
        assert_eq!(s.width(), 3);
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(
            TableSchema::new("t", Vec::new()),
            Err(SchemaError::NoColumns("t".into()))
        );
    }

    #[test]
    fn test_type_inference_and_override() {
        assert_eq!(ColumnType::infer("binary_remote_addr"), ColumnType::Blob);
        assert_eq!(ColumnType::infer("proxy_protocol_server_port"), ColumnType::Integer);
        assert_eq!(ColumnType::infer("gzip_ratio"), ColumnType::Real);
        assert_eq!(ColumnType::infer("http_user_agent"), ColumnType::Text);

        let col = ColumnSpec::new("status", Some(ColumnType::parse("text")));
        assert_eq!(col.sql_type(), &ColumnType::Text);
        assert_eq!(ColumnType::parse("varchar(10)").as_sql(), "varchar(10)");
    }

    #[test]
    fn test_blob_columns_skip_escaping() {
        let col = ColumnSpec::new("cookie", Some(ColumnType::Blob));
        assert_eq!(col.bind_strategy(), BindStrategy::Blob);
        assert_eq!(
            col.source(),
            &ValueSource::Variable {
                name: "cookie".into(),
                escape: false
            }
        );
    }

    #[test]
    fn test_build_row_in_column_order() {
        let s = schema(&[("request", None), ("status", None), ("missing", None)]);
        let req = RequestRecord {
            status: 201,
            ..Default::default()
        }
        .with_variable("request", "GET / HTTP/1.1");

        let row = s.build_row(&req);
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&b"GET / HTTP/1.1"[..]));
        assert_eq!(row.get(1), Some(&b"201"[..]));
        assert_eq!(row.get(2), None);
    }
}
