//! Command implementations for the sqlitelog CLI

pub mod check;
pub mod checkpoint;
pub mod ingest;
