//! DataStore and RowCursor trait definitions.

use crate::error::StoreError;
use crate::value::Row;

/// Trait implemented by every SQL engine the exerciser can drive.
///
/// The lifecycle is split in two levels, mirroring an embedded engine that
/// first has to be started and then accepts connections:
///
/// ```text
/// engine_start -> conn_open -> exec/query ... -> conn_close -> engine_close
/// ```
///
/// Implementations are not required to police the ordering themselves;
/// [`crate::StoreHandle`] does that before forwarding any call.
///
/// # Usage Pattern
///
/// ```ignore
/// let mut handle = StoreHandle::new(SqliteStore::in_memory("demo"));
/// handle.engine_start().await?;
/// handle.conn_open().await?;
/// let affected = handle.exec("INSERT INTO t VALUES (1)").await?;
/// ```
#[async_trait::async_trait]
pub trait DataStore: Send {
    /// Short engine name used in logs and reports.
    fn name(&self) -> &str;

    /// Start the engine so it can accept connections. Called at most once.
    async fn engine_start(&mut self) -> Result<(), StoreError>;

    /// Release engine resources. Called at most once, after `conn_close`.
    async fn engine_close(&mut self);

    /// Open the working connection.
    async fn conn_open(&mut self) -> Result<(), StoreError>;

    /// Close the working connection.
    async fn conn_close(&mut self) -> Result<(), StoreError>;

    /// Execute one statement and return the number of affected rows.
    async fn exec(&mut self, statement: &str) -> Result<u64, StoreError>;

    /// Run one query and return a cursor over its rows.
    ///
    /// The caller must close the cursor on every exit path.
    async fn query(&mut self, statement: &str) -> Result<Box<dyn RowCursor>, StoreError>;
}

/// Forward-only cursor yielding one decoded row per call.
#[async_trait::async_trait]
pub trait RowCursor: Send {
    /// Fetch the next row, or `None` once the result set is exhausted.
    async fn next_row(&mut self) -> Result<Option<Row>, StoreError>;

    /// Release the cursor.
    async fn close(self: Box<Self>) -> Result<(), StoreError>;
}
