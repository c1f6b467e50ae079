//! Embedded SQLite engine adapter.
//!
//! SQLite is linked into the process (bundled build), so "starting the
//! engine" means opening a keeper connection that owns the database for the
//! engine's lifetime. For in-memory databases this keeper is what keeps the
//! data alive: a named shared-cache memory database is dropped by SQLite as
//! soon as its last connection closes.
//!
//! rusqlite is synchronous, so every call that touches a connection runs on
//! tokio's blocking pool and leaves the runtime free for other tasks.
//!
//! # Example
//!
//! ```ignore
//! use datastore_port::StoreHandle;
//! use datastore_sqlite::SqliteStore;
//!
//! let mut handle = StoreHandle::new(SqliteStore::in_memory("demo"));
//! handle.engine_start().await?;
//! handle.conn_open().await?;
//! handle.exec("CREATE TABLE t(id INT)").await?;
//! ```

use datastore_port::{BufferedCursor, DataStore, Row, RowCursor, StoreError, Value};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::PathBuf;
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    /// Named shared-cache in-memory database.
    Memory { name: String },
    /// Database file on disk.
    File(PathBuf),
}

impl SqliteLocation {
    /// Path or URI handed to SQLite when opening a connection.
    fn open_target(&self) -> String {
        match self {
            SqliteLocation::Memory { name } => format!("file:{name}?mode=memory&cache=shared"),
            SqliteLocation::File(path) => path.display().to_string(),
        }
    }
}

/// SQLite implementation of [`DataStore`].
pub struct SqliteStore {
    location: SqliteLocation,
    keeper: Option<Connection>,
    conn: Option<Connection>,
}

impl SqliteStore {
    pub fn new(location: SqliteLocation) -> Self {
        Self {
            location,
            keeper: None,
            conn: None,
        }
    }

    /// In-memory database shared by all connections opened with the same name.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(SqliteLocation::Memory { name: name.into() })
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(SqliteLocation::File(path.into()))
    }

    pub fn location(&self) -> &SqliteLocation {
        &self.location
    }

    /// Run `work` against the working connection on the blocking pool.
    ///
    /// The connection moves into the blocking task and is put back once the
    /// task returns. If the task panics or the caller is cancelled
    /// mid-statement, the connection is lost and later calls fail with
    /// `StoreError::Connection`.
    async fn with_connection<T, F>(&mut self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| StoreError::Connection("connection is not open".to_string()))?;

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = work(&conn);
            (conn, result)
        })
        .await
        .map_err(|e| StoreError::Connection(format!("SQLite task failed: {e}")))?;

        self.conn = Some(conn);
        result
    }
}

async fn open_connection(target: String) -> Result<rusqlite::Result<Connection>, JoinError> {
    tokio::task::spawn_blocking(move || Connection::open(target)).await
}

fn statement_error(err: rusqlite::Error) -> StoreError {
    StoreError::Statement(err.to_string())
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

fn execute(conn: &Connection, statement: &str) -> Result<u64, StoreError> {
    let mut stmt = conn.prepare(statement).map_err(statement_error)?;

    // Row-returning statements cannot go through `execute`; drain them instead.
    if stmt.column_count() > 0 {
        let mut rows = stmt.query([]).map_err(statement_error)?;
        while rows.next().map_err(statement_error)?.is_some() {}
        return Ok(0);
    }

    let changed = stmt.execute([]).map_err(statement_error)?;
    Ok(changed as u64)
}

fn collect_rows(conn: &Connection, statement: &str) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare(statement).map_err(statement_error)?;
    let column_count = stmt.column_count();

    let mapped = stmt
        .query_map([], |row| {
            (0..column_count)
                .map(|i| row.get_ref(i).map(value_from_ref))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })
        .map_err(statement_error)?;

    let mut rows = Vec::new();
    for values in mapped {
        let values = values.map_err(|e| StoreError::Cursor(e.to_string()))?;
        rows.push(Row::new(values));
    }
    Ok(rows)
}

#[async_trait::async_trait]
impl DataStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn engine_start(&mut self) -> Result<(), StoreError> {
        let keeper = open_connection(self.location.open_target())
            .await
            .map_err(|e| StoreError::Engine(e.to_string()))?
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        debug!("SQLite engine started at {}", self.location.open_target());
        self.keeper = Some(keeper);
        Ok(())
    }

    async fn engine_close(&mut self) {
        if let Some(keeper) = self.keeper.take() {
            match tokio::task::spawn_blocking(move || keeper.close()).await {
                Ok(Ok(())) => {}
                Ok(Err((_, e))) => warn!("Failed to close SQLite engine connection: {}", e),
                Err(e) => warn!("SQLite engine close task failed: {}", e),
            }
        }
    }

    async fn conn_open(&mut self) -> Result<(), StoreError> {
        if self.keeper.is_none() {
            return Err(StoreError::Connection("engine is not started".to_string()));
        }
        let conn = open_connection(self.location.open_target())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn conn_close(&mut self) -> Result<(), StoreError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || conn.close())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .map_err(|(_, e)| StoreError::Connection(e.to_string()))
    }

    async fn exec(&mut self, statement: &str) -> Result<u64, StoreError> {
        let statement = statement.to_string();
        self.with_connection(move |conn| execute(conn, &statement)).await
    }

    async fn query(&mut self, statement: &str) -> Result<Box<dyn RowCursor>, StoreError> {
        let statement = statement.to_string();
        let rows = self
            .with_connection(move |conn| collect_rows(conn, &statement))
            .await?;
        Ok(Box::new(BufferedCursor::new(rows)))
    }
}
