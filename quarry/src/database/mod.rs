//! Read-only query execution.
//!
//! Executors only ever receive SQL that passed the guard and had the dataset
//! filter enforced.

mod sqlite;

pub use sqlite::SqliteExecutor;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// One result row, column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Named parameters without the leading `:`.
pub type QueryParams = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Statement exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("Missing value for parameter {0}")]
    MissingParameter(String),

    #[error("Database connection lock poisoned")]
    LockPoisoned,

    #[error("Execution task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        sql: &str,
        params: &QueryParams,
        timeout: Duration,
    ) -> Result<Vec<Row>, ExecutionError>;
}
