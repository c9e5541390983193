//! Target database drivers
//!
//! The execution engine and schema index talk to the target database only through
//! the [`Database`] trait, so drivers can be swapped or faked in tests.

pub mod connection;
pub mod postgres;
pub mod sqlite;

use crate::dialect::Dialect;
use crate::schema_rag::schema::TableSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use connection::connect;
pub use postgres::PostgresDatabase;
pub use sqlite::SqliteDatabase;

/// Raw driver failure; the message is classified by the execution engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Column names plus row values in column order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First value of the first row read as an unsigned count
    pub fn scalar_u64(&self) -> Option<u64> {
        let value = self.rows.first()?.first()?;
        value
            .as_u64()
            .or_else(|| value.as_i64().map(|v| v.max(0) as u64))
            .or_else(|| value.as_f64().map(|v| v.max(0.0) as u64))
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }
}

#[async_trait]
pub trait Database: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Runs one read-only statement and returns every row it produces
    async fn query(&self, sql: &str) -> DriverResult<QueryRows>;

    /// Reads table metadata from the information schema (or its equivalent)
    async fn load_schema(&self) -> DriverResult<Vec<TableSchema>>;
}
