//! External sort support for ORDER BY and aggregate result buffering.
//!
//! Rows spill to a length-prefixed bincode file under the engine temp
//! directory; sorting reorders an in-memory offset table, and reads after
//! the sort decode from the spill file by sorted position.

use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{EngineError, Row, Schema, Value};

/// Environment variable overriding the spill directory.
pub const TEMP_DIR_ENV: &str = "FLINTDB_TEMP_DIR";

static SPILL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Resolve (and create) the per-process temp directory.
pub fn temp_dir() -> PathBuf {
    let path = std::env::var(TEMP_DIR_ENV)
        .ok()
        .filter(|s| !s.is_empty())
        .map_or_else(
            || PathBuf::from(format!("./temp/flintdb_tmp_{}", std::process::id())),
            PathBuf::from,
        );
    if let Err(e) = fs::create_dir_all(&path) {
        warn!(dir = %path.display(), error = %e, "could not create temp directory");
    }
    path
}

/// Fresh spill-file path inside the temp directory.
pub fn temp_sort_path() -> PathBuf {
    let seq = SPILL_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
    temp_dir().join(format!("flintdb_sort_{}_{seq}.tmp", std::process::id()))
}

/// Remove every spill file and the temp directory itself. Safe to call at
/// process shutdown; errors are ignored.
pub fn cleanup_temp_dir() {
    let dir = temp_dir();
    if let Ok(entries) = fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let _ = fs::remove_file(entry.path());
        }
    }
    let _ = fs::remove_dir(&dir);
}

pub struct Filesort {
    path: PathBuf,
    file: File,
    schema: Arc<Schema>,
    /// (offset, byte length) per spilled row, in sorted order after `sort`.
    offsets: Vec<(u64, u32)>,
    write_pos: u64,
}

impl Filesort {
    pub fn new(path: &Path, schema: Arc<Schema>) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        debug!(spill = %path.display(), "filesort opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            schema,
            offsets: Vec::new(),
            write_pos: 0,
        })
    }

    pub fn rows(&self) -> i64 {
        self.offsets.len() as i64
    }

    pub fn add(&mut self, row: &Row) -> Result<(), EngineError> {
        let encoded = bincode::serialize(row.values())
            .map_err(|e| EngineError::RowCodec(e.to_string()))?;
        let len = encoded.len() as u32;
        self.file.seek(SeekFrom::Start(self.write_pos))?;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&encoded)?;
        self.offsets.push((self.write_pos + 4, len));
        self.write_pos += 4 + u64::from(len);
        Ok(())
    }

    fn decode_at(&mut self, offset: u64, len: u32) -> Result<Row, EngineError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf)?;
        let values: Vec<Value> =
            bincode::deserialize(&buf).map_err(|e| EngineError::RowCodec(e.to_string()))?;
        Row::from_values(Arc::clone(&self.schema), values)
    }

    /// Sort the spilled rows with a multi-key comparator. Rows are decoded
    /// once for the comparison pass; the spill file stays the read source.
    pub fn sort<F>(&mut self, compare: F) -> Result<(), EngineError>
    where
        F: Fn(&Row, &Row) -> Ordering,
    {
        let mut keyed: Vec<((u64, u32), Row)> = Vec::with_capacity(self.offsets.len());
        for (offset, len) in self.offsets.clone() {
            let row = self.decode_at(offset, len)?;
            keyed.push(((offset, len), row));
        }
        keyed.sort_by(|(_, a), (_, b)| compare(a, b));
        self.offsets = keyed.into_iter().map(|(pos, _)| pos).collect();
        Ok(())
    }

    /// Read the row at a sorted position.
    pub fn read(&mut self, index: i64) -> Result<Row, EngineError> {
        let (offset, len) = *self
            .offsets
            .get(index as usize)
            .ok_or_else(|| EngineError::Execution(format!("sort index {index} out of range")))?;
        self.decode_at(offset, len)
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }
}

impl Drop for Filesort {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(spill = %self.path.display(), error = %e, "spill file not removed");
        }
    }
}

/// Comparator over ORDER BY specs: sequential tie-break across columns,
/// each independently ascending or descending. NULL sorts first ascending.
pub fn multi_key_comparator(specs: Vec<(usize, bool)>) -> impl Fn(&Row, &Row) -> Ordering {
    move |a, b| {
        for &(col, desc) in &specs {
            let (va, vb) = match (a.get(col), b.get(col)) {
                (Ok(x), Ok(y)) => (x, y),
                _ => continue,
            };
            let ord = match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => va.compare(vb).unwrap_or(Ordering::Equal),
            };
            let ord = if desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("name", DataType::Text);
        Arc::new(s)
    }

    fn row(schema: &Arc<Schema>, id: i64, name: &str) -> Row {
        Row::from_values(
            Arc::clone(schema),
            vec![Value::Integer(id), Value::Text(name.into())],
        )
        .unwrap()
    }

    #[test]
    fn test_spill_sort_read() {
        let dir = tempfile::tempdir().unwrap();
        let s = schema();
        let mut sorter = Filesort::new(&dir.path().join("spill.tmp"), Arc::clone(&s)).unwrap();
        for (id, name) in [(3, "c"), (1, "a"), (2, "b")] {
            sorter.add(&row(&s, id, name)).unwrap();
        }
        assert_eq!(sorter.rows(), 3);

        sorter.sort(multi_key_comparator(vec![(0, false)])).unwrap();
        let ids: Vec<i64> = (0..3)
            .map(|i| sorter.read(i).unwrap().get(0).unwrap().as_int().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        sorter.sort(multi_key_comparator(vec![(0, true)])).unwrap();
        assert_eq!(sorter.read(0).unwrap().get(0).unwrap(), &Value::Integer(3));
    }

    #[test]
    fn test_multi_key_tiebreak() {
        let s = schema();
        let cmp = multi_key_comparator(vec![(1, false), (0, true)]);
        // Same name: higher id first because the second key is descending.
        assert_eq!(cmp(&row(&s, 1, "x"), &row(&s, 2, "x")), Ordering::Greater);
        assert_eq!(cmp(&row(&s, 1, "a"), &row(&s, 2, "b")), Ordering::Less);
    }

    #[test]
    fn test_spill_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spill.tmp");
        {
            let mut sorter = Filesort::new(&path, schema()).unwrap();
            sorter.add(&row(&schema(), 1, "a")).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
