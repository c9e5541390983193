//! SQLite driver
//!
//! rusqlite is blocking, so every call runs on the blocking pool behind a shared
//! connection. Timeouts are enforced by the engine, which drops the pending call.
//! Dropping a call cancels only that call: a statement still waiting for the
//! connection is skipped, and one already running is interrupted.

use crate::db::{Database, DriverError, DriverResult, QueryRows};
use crate::dialect::Dialect;
use crate::schema_rag::schema::{ColumnSchema, ForeignKeyRef, TableSchema};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    interrupt_handle: Arc<InterruptHandle>,
}

fn driver_error(e: rusqlite::Error) -> DriverError {
    DriverError::new(e.to_string())
}

impl SqliteDatabase {
    /// Opens a database file read-only
    pub fn open_read_only(path: impl AsRef<Path>) -> DriverResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(driver_error)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> DriverResult<Self> {
        Ok(Self::from_connection(
            Connection::open_in_memory().map_err(driver_error)?,
        ))
    }

    /// Wraps an existing connection, e.g. one already seeded with data
    pub fn from_connection(conn: Connection) -> Self {
        let interrupt_handle = Arc::new(conn.get_interrupt_handle());
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt_handle,
        }
    }

    async fn run<T, F>(&self, f: F) -> DriverResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> DriverResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let ticket = Arc::new(Mutex::new(CallState::Queued));
        let mut cancel = CancelOnDrop {
            ticket: Arc::clone(&ticket),
            interrupt_handle: Arc::clone(&self.interrupt_handle),
            armed: true,
        };

        let result = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| DriverError::new("sqlite connection lock poisoned"))?;
            {
                let mut state = ticket.lock().unwrap_or_else(PoisonError::into_inner);
                if *state == CallState::Cancelled {
                    debug!("Skipping sqlite call cancelled while queued");
                    return Err(DriverError::new("statement cancelled before it started"));
                }
                *state = CallState::Running;
            }
            let result = f(&guard);
            // Finished is set while the connection is still held, so a late cancel
            // can never interrupt the next caller's statement
            *ticket.lock().unwrap_or_else(PoisonError::into_inner) = CallState::Finished;
            drop(guard);
            result
        })
        .await;
        cancel.armed = false;

        result.map_err(|e| DriverError::new(format!("sqlite worker failed: {}", e)))?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Queued,
    Running,
    Finished,
    Cancelled,
}

/// Cancels one call when its future is dropped before completion
struct CancelOnDrop {
    ticket: Arc<Mutex<CallState>>,
    interrupt_handle: Arc<InterruptHandle>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.ticket.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            CallState::Queued => *state = CallState::Cancelled,
            // Holding the ticket keeps the call from finishing under the interrupt
            CallState::Running => {
                debug!("Interrupting running sqlite statement");
                self.interrupt_handle.interrupt();
            }
            CallState::Finished | CallState::Cancelled => {}
        }
    }
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
    }
}

fn query_blocking(conn: &Connection, sql: &str) -> DriverResult<QueryRows> {
    let mut stmt = conn.prepare(sql).map_err(driver_error)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = stmt.query([]).map_err(driver_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(driver_error)? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(value_to_json(row.get_ref(i).map_err(driver_error)?));
        }
        out.push(values);
    }

    Ok(QueryRows { columns, rows: out })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn load_schema_blocking(conn: &Connection) -> DriverResult<Vec<TableSchema>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .map_err(driver_error)?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(driver_error)?
        .collect::<Result<_, _>>()
        .map_err(driver_error)?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let quoted = quote_ident(&name);

        // cid, name, type, notnull, dflt_value, pk
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", quoted))
            .map_err(driver_error)?;
        let mut columns: Vec<ColumnSchema> = stmt
            .query_map([], |row| {
                Ok(ColumnSchema {
                    name: row.get(1)?,
                    data_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    nullable: row.get::<_, i64>(3)? == 0,
                    comment: None,
                    is_primary_key: row.get::<_, i64>(5)? > 0,
                    is_unique: false,
                })
            })
            .map_err(driver_error)?
            .collect::<Result<_, _>>()
            .map_err(driver_error)?;

        let pk_count = columns.iter().filter(|c| c.is_primary_key).count();
        if pk_count == 1 {
            for column in columns.iter_mut().filter(|c| c.is_primary_key) {
                column.is_unique = true;
                column.nullable = false;
            }
        }

        // seq, name, unique, origin, partial
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({})", quoted))
            .map_err(driver_error)?;
        let unique_indexes: Vec<String> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)?)))
            .map_err(driver_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(driver_error)?
            .into_iter()
            .filter(|(_, unique)| *unique == 1)
            .map(|(index, _)| index)
            .collect();

        for index in unique_indexes {
            let mut stmt = conn
                .prepare(&format!("PRAGMA index_info({})", quote_ident(&index)))
                .map_err(driver_error)?;
            let indexed: Vec<String> = stmt
                .query_map([], |row| row.get::<_, Option<String>>(2))
                .map_err(driver_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(driver_error)?
                .into_iter()
                .flatten()
                .collect();
            if let [single] = indexed.as_slice() {
                if let Some(column) = columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(single)) {
                    column.is_unique = true;
                }
            }
        }

        // id, seq, table, from, to, ...
        let mut stmt = conn
            .prepare(&format!("PRAGMA foreign_key_list({})", quoted))
            .map_err(driver_error)?;
        let foreign_keys: Vec<ForeignKeyRef> = stmt
            .query_map([], |row| {
                Ok(ForeignKeyRef {
                    column: row.get(3)?,
                    referenced_table: row.get(2)?,
                    referenced_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })
            .map_err(driver_error)?
            .collect::<Result<_, _>>()
            .map_err(driver_error)?;

        debug!("Loaded sqlite table {} ({} columns)", name, columns.len());
        tables.push(TableSchema {
            name,
            comment: None,
            columns,
            foreign_keys,
        });
    }

    Ok(tables)
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str) -> DriverResult<QueryRows> {
        let sql = sql.to_string();
        self.run(move |conn| query_blocking(conn, &sql)).await
    }

    async fn load_schema(&self) -> DriverResult<Vec<TableSchema>> {
        self.run(load_schema_blocking).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::error::QueryError;
    use crate::execution::{ExecutionEngine, ExecutionRequest};
    use std::time::Duration;

    fn seeded() -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Customer (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT UNIQUE);
             CREATE TABLE Invoice (
                 id INTEGER PRIMARY KEY,
                 customerId INTEGER REFERENCES Customer(id),
                 total REAL,
                 issued TEXT
             );
             INSERT INTO Customer VALUES (1, 'Ada', 'ada@example.com'), (2, 'Linus', NULL);
             INSERT INTO Invoice VALUES (1, 1, 12.5, '2024-01-02'), (2, 2, 7.0, '2024-01-03');",
        )
        .unwrap();
        SqliteDatabase::from_connection(conn)
    }

    #[tokio::test]
    async fn test_load_schema_reads_keys() {
        let db = seeded();
        let tables = db.load_schema().await.unwrap();
        assert_eq!(tables.len(), 2);

        let customer = tables.iter().find(|t| t.name == "Customer").unwrap();
        assert!(customer.column("id").unwrap().is_primary_key);
        assert!(customer.column("email").unwrap().is_unique);
        assert!(!customer.column("name").unwrap().nullable);

        let invoice = tables.iter().find(|t| t.name == "Invoice").unwrap();
        assert_eq!(invoice.foreign_keys.len(), 1);
        assert_eq!(invoice.foreign_keys[0].referenced_table, "Customer");
        assert_eq!(invoice.foreign_keys[0].column, "customerId");
    }

    #[tokio::test]
    async fn test_query_maps_values() {
        let db = seeded();
        let rows = db
            .query("SELECT id, name, email FROM Customer ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "name", "email"]);
        assert_eq!(rows.rows[0][0], Value::from(1));
        assert_eq!(rows.rows[1][2], Value::Null);
    }

    #[tokio::test]
    async fn test_syntax_error_surfaces_driver_message() {
        let db = seeded();
        let err = db.query("SELEC 1").await.unwrap_err();
        assert!(err.0.to_lowercase().contains("syntax"));
    }

    fn slow_count(limit: u64) -> String {
        format!(
            "WITH RECURSIVE seq(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM seq WHERE x < {}) \
             SELECT count(*) FROM seq",
            limit
        )
    }

    #[tokio::test]
    async fn test_cancelled_queued_call_is_skipped_without_touching_running_one() {
        let db = seeded();
        db.query("CREATE TABLE audit (id INTEGER)").await.unwrap();

        let conn = Arc::clone(&db.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            let count = guard.query_row(&slow_count(2_000_000), [], |row| row.get::<_, i64>(0));
            count
        });
        locked_rx.recv().unwrap();

        let queued = tokio::time::timeout(
            Duration::from_millis(20),
            db.query("INSERT INTO audit VALUES (1)"),
        )
        .await;
        assert!(queued.is_err());

        // The statement that owned the connection ran to completion
        assert_eq!(holder.join().unwrap().unwrap(), 2_000_000);

        let rows = db.query("SELECT count(*) FROM audit").await.unwrap();
        assert_eq!(rows.scalar_u64(), Some(0));
    }

    #[tokio::test]
    async fn test_cancelled_running_call_is_interrupted() {
        let db = seeded();
        let running = tokio::time::timeout(
            Duration::from_millis(50),
            db.query(&slow_count(1_000_000_000_000)),
        )
        .await;
        assert!(running.is_err());

        let next = tokio::time::timeout(Duration::from_secs(5), db.query("SELECT 1 AS one"))
            .await
            .expect("connection still busy after cancellation")
            .unwrap();
        assert_eq!(next.scalar_u64(), Some(1));
    }

    #[tokio::test]
    async fn test_engine_timeout_skips_only_its_own_statement() {
        let db = Arc::new(seeded());
        db.query("CREATE TABLE audit (id INTEGER)").await.unwrap();

        let conn = Arc::clone(&db.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(1500));
            let count = guard.query_row("SELECT count(*) FROM Customer", [], |row| row.get::<_, i64>(0));
            count
        });
        locked_rx.recv().unwrap();

        let engine = ExecutionEngine::new(
            db.clone(),
            ExecutionConfig {
                timeout_secs: 1,
                ..Default::default()
            },
        );
        let err = engine
            .execute(&ExecutionRequest::plain("INSERT INTO audit VALUES (1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout { timeout_ms: 1000 }));

        assert_eq!(holder.join().unwrap().unwrap(), 2);
        let rows = db.query("SELECT count(*) FROM audit").await.unwrap();
        assert_eq!(rows.scalar_u64(), Some(0));
    }
}
