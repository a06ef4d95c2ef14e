//! Data store access for the gateway.
//!
//! Modules reach the database exclusively through the generic [`DataStore`]
//! interface: equality-filtered selects, single-row inserts, and filtered
//! updates/deletes. Rows travel as JSON maps so the engine stays agnostic of
//! any one module's record shape.

pub mod schema;
pub mod sqlite_store;
pub mod versioned_schema;

pub use sqlite_store::SqliteGatewayStore;

use serde_json::Value;
use thiserror::Error;

/// A row as it crosses the store boundary: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Equality filter on a single column.
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Generic table-level access. Implementations validate table and column
/// names against the schema before building any SQL.
pub trait DataStore: Send + Sync {
    /// All rows of `table` matching every filter (unfiltered when empty),
    /// in insertion order.
    fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError>;

    /// Insert one row; returns the storage rowid.
    fn insert(&self, table: &str, row: &Row) -> Result<i64, StoreError>;

    /// Apply `changes` to every row matching the filters; returns the number
    /// of rows touched.
    fn update(&self, table: &str, filters: &[Filter], changes: &Row) -> Result<usize, StoreError>;

    /// Delete every row matching the filters; returns the number of rows
    /// removed.
    fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, StoreError>;
}
