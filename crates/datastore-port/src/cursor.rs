//! Cursor over rows that have already been fetched from the engine.

use crate::error::StoreError;
use crate::traits::RowCursor;
use crate::value::Row;
use std::collections::VecDeque;

/// A [`RowCursor`] over materialised rows.
///
/// Adapters whose driver hands back a complete result set (or whose native
/// cursor borrows the connection) collect the rows and return this.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    rows: VecDeque<Row>,
}

impl BufferedCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into() }
    }

    /// Rows not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait::async_trait]
impl RowCursor for BufferedCursor {
    async fn next_row(&mut self) -> Result<Option<Row>, StoreError> {
        Ok(self.rows.pop_front())
    }

    async fn close(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
