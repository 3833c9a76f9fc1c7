//! Process-wide table-handle pool.
//!
//! Concurrent statements against the same file path share one open table:
//! one cache, one writer, one set of descriptors. The pool is an injected
//! registry (a constructor parameter of the executor), not ambient global
//! state. Opens run outside the registry lock since they perform I/O; a
//! racing second open keeps the first registration and discards the loser.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, warn};

use crate::core::EngineError;
use crate::storage::Table;

pub struct TablePool {
    entries: Mutex<HashMap<PathBuf, PoolEntry>>,
}

struct PoolEntry {
    table: Arc<Table>,
    refcount: u32,
    last_used: Instant,
}

/// A borrowed, reference-counted table. Dropping the handle releases the
/// reference; at zero the entry leaves the registry and the table closes.
pub struct TableHandle {
    pool: Arc<TablePool>,
    key: PathBuf,
    table: Arc<Table>,
}

impl Deref for TableHandle {
    type Target = Table;

    fn deref(&self) -> &Table {
        &self.table
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        self.pool.release(&self.key);
    }
}

impl Default for TablePool {
    fn default() -> Self {
        Self::new()
    }
}

impl TablePool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, PoolEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn key_for(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// Borrow a handle for `path`, opening the table on first use.
    pub fn borrow(self: &Arc<Self>, path: &Path) -> Result<TableHandle, EngineError> {
        if !path.exists() {
            return Err(EngineError::TableNotFound(path.display().to_string()));
        }
        let key = Self::key_for(path);

        {
            let mut entries = self.lock();
            if let Some(entry) = entries.get_mut(&key) {
                entry.refcount += 1;
                entry.last_used = Instant::now();
                debug!(table = %key.display(), refcount = entry.refcount, "pool hit");
                return Ok(TableHandle {
                    pool: Arc::clone(self),
                    key,
                    table: Arc::clone(&entry.table),
                });
            }
        }

        // Open outside the lock; opening reads the whole file.
        let opened = Arc::new(Table::open(path, None)?);

        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| PoolEntry {
            table: Arc::clone(&opened),
            refcount: 0,
            last_used: Instant::now(),
        });
        entry.refcount += 1;
        entry.last_used = Instant::now();
        let table = Arc::clone(&entry.table);
        debug!(table = %key.display(), refcount = entry.refcount, "pool borrow");
        Ok(TableHandle {
            pool: Arc::clone(self),
            key,
            table,
        })
    }

    fn release(&self, key: &Path) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        entry.last_used = Instant::now();
        if entry.refcount == 0 {
            // Removal and the real close belong to the same transition.
            let entry = entries.remove(key);
            drop(entries);
            if let Some(e) = entry {
                debug!(table = %key.display(), "pool close");
                if let Err(err) = e.table.flush() {
                    warn!(table = %key.display(), error = %err, "close flush failed");
                }
            }
        }
    }

    /// Number of registered handles (refcount > 0 entries only).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Flush and drop every still-registered handle. Called from `Drop` at
    /// process teardown; safe to call explicitly.
    pub fn close_all(&self) {
        let drained: Vec<(PathBuf, PoolEntry)> = self.lock().drain().collect();
        for (key, entry) in drained {
            if let Err(err) = entry.table.flush() {
                warn!(table = %key.display(), error = %err, "shutdown flush failed");
            }
        }
    }
}

impl Drop for TablePool {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Schema};

    fn create_table(dir: &Path) -> PathBuf {
        let path = dir.join("t.flintdb");
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer).add_index("primary", &["id"]);
        Table::open(&path, Some(&s)).unwrap();
        path
    }

    #[test]
    fn test_borrow_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_table(dir.path());
        let pool = Arc::new(TablePool::new());

        let a = pool.borrow(&path).unwrap();
        let b = pool.borrow(&path).unwrap();
        assert_eq!(pool.len(), 1);
        // Both handles reach the same underlying table.
        assert!(Arc::ptr_eq(&a.table, &b.table));
        drop(a);
        assert_eq!(pool.len(), 1);
        drop(b);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_refcount_invariant_concurrent() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_table(dir.path());
        let pool = Arc::new(TablePool::new());

        let mut joins = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let path = path.clone();
            joins.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let h = pool.borrow(&path).unwrap();
                    let _ = h.rows();
                }
            }));
        }
        for j in joins {
            j.join().unwrap();
        }
        assert!(pool.is_empty());
        // The table is reopenable after every reference is released.
        let h = pool.borrow(&path).unwrap();
        assert_eq!(h.rows(), 0);
    }

    #[test]
    fn test_missing_file() {
        let pool = Arc::new(TablePool::new());
        assert!(matches!(
            pool.borrow(Path::new("absent.flintdb")),
            Err(EngineError::TableNotFound(_))
        ));
    }
}
