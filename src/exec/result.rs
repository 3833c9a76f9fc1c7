use crate::core::{EngineError, Row};
use crate::txn::Transaction;

use super::cursor::RowCursor;

/// Outcome of one statement. Exactly one of `rows` / `affected` is
/// meaningful depending on the statement kind (`affected` is -1 for row
/// results of unknown size). Dropping the result closes the cursor chain
/// and everything it wraps.
pub struct SqlResult {
    pub rows: Option<Box<dyn RowCursor>>,
    pub column_names: Vec<String>,
    pub affected: i64,
    pub transaction: Option<Transaction>,
}

impl SqlResult {
    pub fn affected(affected: i64) -> Self {
        Self {
            rows: None,
            column_names: Vec::new(),
            affected,
            transaction: None,
        }
    }

    pub fn with_cursor(cursor: Box<dyn RowCursor>, column_names: Vec<String>) -> Self {
        Self {
            rows: Some(cursor),
            column_names,
            affected: -1,
            transaction: None,
        }
    }

    pub fn empty() -> Self {
        Self::affected(0)
    }

    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    /// Advance the row cursor. The returned row borrows the result and is
    /// invalidated by the next call.
    pub fn next_row(&mut self) -> Result<Option<&Row>, EngineError> {
        match &mut self.rows {
            Some(cursor) => cursor.next(),
            None => Ok(None),
        }
    }

    /// Drain all rows into display strings, mostly for tests and callers
    /// that want a materialized grid.
    pub fn collect_strings(&mut self) -> Result<Vec<Vec<String>>, EngineError> {
        let mut out = Vec::new();
        while let Some(row) = self.next_row()? {
            out.push((0..row.len()).map(|i| row.display_value(i)).collect());
        }
        Ok(out)
    }
}
