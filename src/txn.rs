//! Statement-level transactions.
//!
//! A transaction pins its target table: it holds a pooled handle for its
//! whole lifetime, so the pool cannot close (and flush) the table between
//! the statements running under it. BEGIN snapshots the table's schema;
//! `validate` rejects the transaction once the schema drifts. COMMIT
//! flushes the table, ROLLBACK reloads the last flushed state. Conflicting
//! row writes are serialized by the storage engine itself.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::core::{EngineError, Schema};
use crate::exec::TableHandle;

pub struct Transaction {
    handle: TableHandle,
    snapshot: Arc<Schema>,
}

impl Transaction {
    pub fn begin(handle: TableHandle) -> Self {
        debug!(table = %handle.path().display(), "transaction begin");
        let snapshot = handle.meta();
        Self { handle, snapshot }
    }

    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    /// Fail when the table's schema changed since BEGIN.
    pub fn validate(&self) -> Result<(), EngineError> {
        let current = self.handle.meta();
        if *current != *self.snapshot {
            return Err(EngineError::SchemaMismatch(format!(
                "transaction snapshot is stale for table '{}'",
                self.handle.path().display()
            )));
        }
        Ok(())
    }

    /// Persist everything written since the last flush, then release the
    /// pinned handle.
    pub fn commit(self) -> Result<(), EngineError> {
        debug!(table = %self.handle.path().display(), "transaction commit");
        self.handle.flush()
    }

    /// Discard unflushed writes by reloading the table, then release the
    /// pinned handle.
    pub fn rollback(self) -> Result<(), EngineError> {
        debug!(table = %self.handle.path().display(), "transaction rollback");
        self.handle.reload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Row, Value};
    use crate::exec::TablePool;
    use crate::storage::Table;

    fn schema() -> Schema {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("qty", DataType::Integer)
            .add_index("primary", &["id"]);
        s
    }

    fn make_row(m: &Arc<Schema>, id: i64, qty: i64) -> Row {
        Row::from_values(
            Arc::clone(m),
            vec![Value::Integer(id), Value::Integer(qty)],
        )
        .unwrap()
    }

    #[test]
    fn test_commit_persists_rollback_discards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.flintdb");
        Table::open(&path, Some(&schema())).unwrap().flush().unwrap();
        let pool = Arc::new(TablePool::new());

        let txn = Transaction::begin(pool.borrow(&path).unwrap());
        let h = pool.borrow(&path).unwrap();
        let m = h.meta();
        h.apply(&make_row(&m, 1, 5), false).unwrap();
        drop(h);
        txn.commit().unwrap();

        let h = pool.borrow(&path).unwrap();
        assert_eq!(h.rows(), 1);

        let txn = Transaction::begin(pool.borrow(&path).unwrap());
        h.apply(&make_row(&m, 2, 7), false).unwrap();
        assert_eq!(h.rows(), 2);
        txn.rollback().unwrap();
        assert_eq!(h.rows(), 1);
    }

    #[test]
    fn test_validate_ok_while_schema_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.flintdb");
        Table::open(&path, Some(&schema())).unwrap().flush().unwrap();
        let pool = Arc::new(TablePool::new());
        let txn = Transaction::begin(pool.borrow(&path).unwrap());
        txn.validate().unwrap();
    }
}
