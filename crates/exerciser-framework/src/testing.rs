//! Scripted in-memory data store used by unit tests.

use crate::statement::StatementKind;
use datastore_port::{DataStore, Row, RowCursor, StoreError, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared observations of a [`ScriptedStore`], readable after the store moved.
#[derive(Debug, Default)]
pub struct Journal {
    pub calls: Mutex<Vec<String>>,
    pub cursors_opened: AtomicUsize,
    pub cursors_closed: AtomicUsize,
}

impl Journal {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn execs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("exec:").map(str::to_string))
            .collect()
    }

    pub fn open_cursors(&self) -> usize {
        self.cursors_opened.load(Ordering::SeqCst) - self.cursors_closed.load(Ordering::SeqCst)
    }

    pub fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Store double that keeps a single row counter.
///
/// Inserts add one row, truncate-equivalents clear it, any query mentioning
/// `COUNT` returns the counter and other queries return `rows`.
#[derive(Default)]
pub struct ScriptedStore {
    pub journal: Arc<Journal>,
    pub count: i64,
    pub rows: Vec<Row>,
    /// Statements containing any of these fragments fail.
    pub fail_on: Vec<String>,
    pub fail_engine_start: bool,
    pub fail_conn_open: bool,
    pub fail_conn_close: bool,
    /// Cursors fail after yielding this many rows.
    pub fail_cursor_after: Option<usize>,
    /// Added to the counter reported by `COUNT` queries.
    pub count_skew: i64,
    /// Every `exec` sleeps this long before answering.
    pub exec_delay: Option<Duration>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on.push(fragment.to_string());
        self
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = Some(delay);
        self
    }

    fn check(&self, statement: &str) -> Result<(), StoreError> {
        if self.fail_on.iter().any(|f| statement.contains(f.as_str())) {
            return Err(StoreError::Statement(format!("rejected: {statement}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DataStore for ScriptedStore {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn engine_start(&mut self) -> Result<(), StoreError> {
        self.journal.push("engine_start".to_string());
        if self.fail_engine_start {
            return Err(StoreError::Engine("port in use".to_string()));
        }
        Ok(())
    }

    async fn engine_close(&mut self) {
        self.journal.push("engine_close".to_string());
    }

    async fn conn_open(&mut self) -> Result<(), StoreError> {
        self.journal.push("conn_open".to_string());
        if self.fail_conn_open {
            return Err(StoreError::Connection("refused".to_string()));
        }
        Ok(())
    }

    async fn conn_close(&mut self) -> Result<(), StoreError> {
        self.journal.push("conn_close".to_string());
        if self.fail_conn_close {
            return Err(StoreError::Connection("broken pipe".to_string()));
        }
        Ok(())
    }

    async fn exec(&mut self, statement: &str) -> Result<u64, StoreError> {
        self.journal.push(format!("exec:{statement}"));
        if let Some(delay) = self.exec_delay {
            tokio::time::sleep(delay).await;
        }
        self.check(statement)?;
        match StatementKind::classify(statement) {
            StatementKind::Insert => {
                self.count += 1;
                Ok(1)
            }
            StatementKind::Truncate => {
                let removed = self.count as u64;
                self.count = 0;
                Ok(removed)
            }
            _ => Ok(0),
        }
    }

    async fn query(&mut self, statement: &str) -> Result<Box<dyn RowCursor>, StoreError> {
        self.journal.push(format!("query:{statement}"));
        self.check(statement)?;
        let rows = if statement.to_ascii_uppercase().contains("COUNT") {
            vec![Row::new(vec![Value::Int(self.count + self.count_skew)])]
        } else {
            self.rows.clone()
        };
        self.journal.cursors_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCursor {
            rows: rows.into(),
            yielded: 0,
            fail_after: self.fail_cursor_after,
            journal: self.journal.clone(),
        }))
    }
}

struct ScriptedCursor {
    rows: VecDeque<Row>,
    yielded: usize,
    fail_after: Option<usize>,
    journal: Arc<Journal>,
}

#[async_trait::async_trait]
impl RowCursor for ScriptedCursor {
    async fn next_row(&mut self) -> Result<Option<Row>, StoreError> {
        if self.fail_after == Some(self.yielded) {
            return Err(StoreError::Cursor("connection reset".to_string()));
        }
        self.yielded += 1;
        Ok(self.rows.pop_front())
    }

    async fn close(self: Box<Self>) -> Result<(), StoreError> {
        self.journal.cursors_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
