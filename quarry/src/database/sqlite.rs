use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{ExecutionError, QueryExecutor, QueryParams, Row};

/// SQLite-backed executor.
///
/// Statements run on the blocking pool; a progress handler interrupts any
/// statement that outlives its deadline.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExecutor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let conn = Connection::open(path).map_err(|e| ExecutionError::Database(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, ExecutionError> {
        let conn = Connection::open_in_memory().map_err(|e| ExecutionError::Database(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run setup statements (schema, fixtures). Not guarded; for trusted callers only.
    pub fn execute_batch(&self, sql: &str) -> Result<(), ExecutionError> {
        let conn = self.conn.lock().map_err(|_| ExecutionError::LockPoisoned)?;
        conn.execute_batch(sql)
            .map_err(|e| ExecutionError::Database(e.to_string()))
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(
        &self,
        sql: &str,
        params: &QueryParams,
        timeout: Duration,
    ) -> Result<Vec<Row>, ExecutionError> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.clone();
        tokio::task::spawn_blocking(move || run_query(&conn, &sql, &params, timeout))
            .await
            .map_err(|e| ExecutionError::Task(e.to_string()))?
    }
}

fn run_query(
    conn: &Mutex<Connection>,
    sql: &str,
    params: &QueryParams,
    timeout: Duration,
) -> Result<Vec<Row>, ExecutionError> {
    let conn = conn.lock().map_err(|_| ExecutionError::LockPoisoned)?;
    let deadline = Instant::now() + timeout;
    conn.progress_handler(1_000, Some(move || Instant::now() >= deadline));
    let result = query_rows(&conn, sql, params, timeout);
    conn.progress_handler(0, None::<fn() -> bool>);

    if let Ok(rows) = &result {
        tracing::debug!(rows = rows.len(), "sqlite statement finished");
    }
    result
}

fn map_sqlite_error(err: rusqlite::Error, timeout: Duration) -> ExecutionError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
            ExecutionError::Timeout(timeout)
        }
        other => ExecutionError::Database(other.to_string()),
    }
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: &QueryParams,
    timeout: Duration,
) -> Result<Vec<Row>, ExecutionError> {
    let db_err = |e: rusqlite::Error| map_sqlite_error(e, timeout);
    let mut stmt = conn.prepare(sql).map_err(db_err)?;

    for index in 1..=stmt.parameter_count() {
        let name = match stmt.parameter_name(index) {
            Some(name) => name.trim_start_matches([':', '@', '$']).to_string(),
            None => continue,
        };
        let value = params
            .get(&name)
            .ok_or_else(|| ExecutionError::MissingParameter(name.clone()))?;
        stmt.raw_bind_parameter(index, to_sql_value(value)).map_err(db_err)?;
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(db_err)? {
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let value = row.get_ref(i).map_err(db_err)?;
            record.insert(name.clone(), from_sql_value(value));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}
