//! Binary table storage behind the engine interface: a bincode-encoded row
//! file with a JSON `.desc` schema sidecar. Rows live in slots addressed by
//! rowid; deletes tombstone the slot. Scans run in key order of the chosen
//! index with early exit once the seekable range is passed.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::core::{EngineError, Row, Schema, Value};
use crate::filter::Filter;

pub struct Table {
    path: PathBuf,
    inner: Mutex<TableInner>,
}

struct TableInner {
    schema: Arc<Schema>,
    rows: Vec<Option<Row>>,
    live: i64,
    dirty: bool,
}

/// Key-ordered stream of matching rowids produced by [`Table::find`].
pub struct RowIdCursor {
    ids: std::vec::IntoIter<i64>,
}

impl RowIdCursor {
    pub fn new(ids: Vec<i64>) -> Self {
        Self {
            ids: ids.into_iter(),
        }
    }

    pub fn next(&mut self) -> Option<i64> {
        self.ids.next()
    }
}

impl Table {
    /// Open a table file, creating it when `schema` is provided and the file
    /// does not exist yet.
    pub fn open(path: &Path, schema: Option<&Schema>) -> Result<Self, EngineError> {
        let sidecar = Schema::sidecar_path(path);
        let schema: Arc<Schema> = if sidecar.exists() {
            Schema::open(path)?
        } else if let Some(s) = schema {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            s.save(path)?;
            Arc::new(s.clone())
        } else {
            return Err(EngineError::MissingMetadata(path.display().to_string()));
        };

        let mut rows: Vec<Option<Row>> = Vec::new();
        let mut live = 0i64;
        if path.exists() {
            let bytes = fs::read(path)?;
            if !bytes.is_empty() {
                let decoded: Vec<Option<Vec<Value>>> = bincode::deserialize(&bytes)
                    .map_err(|e| EngineError::RowCodec(e.to_string()))?;
                rows.reserve(decoded.len());
                for slot in decoded {
                    match slot {
                        Some(values) => {
                            rows.push(Some(Row::from_values(Arc::clone(&schema), values)?));
                            live += 1;
                        }
                        None => rows.push(None),
                    }
                }
            }
        } else {
            fs::write(path, [])?;
        }

        debug!(table = %path.display(), rows = live, "table opened");
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(TableInner {
                schema,
                rows,
                live,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> Arc<Schema> {
        Arc::clone(&self.lock().schema)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Find matching rowids. `expr` is the combined scan expression the
    /// dispatcher assembles: `[USE INDEX(name [DESC])] [WHERE <predicate>]`.
    /// The predicate splits against the chosen index; the seekable prefix
    /// bounds the key-ordered scan, the residual filters row by row.
    pub fn find(&self, expr: &str) -> Result<RowIdCursor, EngineError> {
        let (hint, where_clause) = parse_scan_expr(expr);
        let inner = self.lock();
        let schema = Arc::clone(&inner.schema);

        let filter = Filter::compile(where_clause, &schema)?;

        let (index, descending) = match hint {
            Some((name, desc)) => {
                let idx = schema
                    .index_named(&name)
                    .ok_or_else(|| EngineError::Execution(format!("unknown index: {name}")))?;
                (Some(idx), desc)
            }
            None => {
                let picked = match &filter {
                    Some(_) => crate::filter::best_index(where_clause, "", &schema)?,
                    None => None,
                };
                (picked.map(|i| &schema.indexes[i]), false)
            }
        };

        let mut ids: Vec<i64> = (0..inner.rows.len() as i64)
            .filter(|&i| inner.rows[i as usize].is_some())
            .collect();

        let layers = match (&filter, index) {
            (Some(f), Some(idx)) => f.split(&schema, idx),
            (Some(f), None) => crate::filter::FilterLayers {
                first: None,
                second: Some(f.clone()),
            },
            (None, _) => crate::filter::FilterLayers::default(),
        };

        if let Some(idx) = index {
            let key_cols: Vec<usize> = idx
                .keys
                .iter()
                .filter_map(|k| schema.column_at(k))
                .collect();
            ids.sort_by(|&a, &b| {
                let ra = inner.rows[a as usize].as_ref().unwrap();
                let rb = inner.rows[b as usize].as_ref().unwrap();
                key_tuple_cmp(ra, rb, &key_cols).then(a.cmp(&b))
            });
            if descending {
                ids.reverse();
            }
        }

        let mut out = Vec::new();
        let mut in_range = layers.first.is_none();
        for id in ids {
            let row = inner.rows[id as usize].as_ref().unwrap();
            if let Some(first) = &layers.first {
                if first.matches(row)? {
                    in_range = true;
                } else if in_range {
                    // Past the contiguous key range of the seekable prefix.
                    break;
                } else {
                    continue;
                }
            }
            if let Some(second) = &layers.second {
                if !second.matches(row)? {
                    continue;
                }
            }
            out.push(id);
        }
        Ok(RowIdCursor::new(out))
    }

    /// Cache-backed read: an owned copy of the row.
    pub fn read(&self, rowid: i64) -> Result<Row, EngineError> {
        let inner = self.lock();
        inner
            .rows
            .get(rowid as usize)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or_else(|| EngineError::Execution(format!("no row at {rowid}")))
    }

    /// Streaming read: decode straight into the caller's reusable buffer,
    /// bypassing the copy path.
    pub fn read_stream(&self, rowid: i64, dest: &mut Row) -> Result<(), EngineError> {
        let inner = self.lock();
        let row = inner
            .rows
            .get(rowid as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| EngineError::Execution(format!("no row at {rowid}")))?;
        dest.copy_from(row)
    }

    /// Insert a row; with `upsert`, replace the row holding the same
    /// primary-key tuple. Returns the rowid.
    pub fn apply(&self, row: &Row, upsert: bool) -> Result<i64, EngineError> {
        let mut inner = self.lock();
        if row.len() != inner.schema.columns.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "row has {} values, table '{}' has {} columns",
                row.len(),
                inner.schema.name,
                inner.schema.columns.len()
            )));
        }

        let key_cols: Vec<usize> = inner
            .schema
            .indexes
            .first()
            .map(|idx| {
                idx.keys
                    .iter()
                    .filter_map(|k| inner.schema.column_at(k))
                    .collect()
            })
            .unwrap_or_default();

        if !key_cols.is_empty() {
            let existing = inner.rows.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|r| key_tuple_cmp(r, row, &key_cols) == Ordering::Equal)
            });
            if let Some(pos) = existing {
                if !upsert {
                    return Err(EngineError::Execution(format!(
                        "duplicate key in table '{}'",
                        inner.schema.name
                    )));
                }
                inner.rows[pos] = Some(row.clone());
                inner.dirty = true;
                return Ok(pos as i64);
            }
        }

        inner.rows.push(Some(row.clone()));
        inner.live += 1;
        inner.dirty = true;
        Ok(inner.rows.len() as i64 - 1)
    }

    pub fn apply_at(&self, rowid: i64, row: &Row) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let slot = inner
            .rows
            .get_mut(rowid as usize)
            .ok_or_else(|| EngineError::Execution(format!("no row at {rowid}")))?;
        if slot.is_none() {
            return Err(EngineError::Execution(format!("no row at {rowid}")));
        }
        *slot = Some(row.clone());
        inner.dirty = true;
        Ok(())
    }

    pub fn delete_at(&self, rowid: i64) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let slot = inner
            .rows
            .get_mut(rowid as usize)
            .ok_or_else(|| EngineError::Execution(format!("no row at {rowid}")))?;
        if slot.take().is_some() {
            inner.live -= 1;
            inner.dirty = true;
            Ok(())
        } else {
            Err(EngineError::Execution(format!("no row at {rowid}")))
        }
    }

    pub fn rows(&self) -> i64 {
        self.lock().live
    }

    pub fn bytes(&self) -> Result<i64, EngineError> {
        Ok(fs::metadata(&self.path).map(|m| m.len() as i64).unwrap_or(0))
    }

    pub fn flush(&self) -> Result<(), EngineError> {
        let mut inner = self.lock();
        if !inner.dirty {
            return Ok(());
        }
        let encoded: Vec<Option<&[Value]>> = inner
            .rows
            .iter()
            .map(|slot| slot.as_ref().map(Row::values))
            .collect();
        let bytes =
            bincode::serialize(&encoded).map_err(|e| EngineError::RowCodec(e.to_string()))?;
        fs::write(&self.path, bytes)?;
        inner.dirty = false;
        debug!(table = %self.path.display(), "table flushed");
        Ok(())
    }

    /// Discard in-memory state and re-read the last flushed contents.
    pub fn reload(&self) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let schema = Arc::clone(&inner.schema);
        let mut rows: Vec<Option<Row>> = Vec::new();
        let mut live = 0i64;
        let bytes = fs::read(&self.path)?;
        if !bytes.is_empty() {
            let decoded: Vec<Option<Vec<Value>>> =
                bincode::deserialize(&bytes).map_err(|e| EngineError::RowCodec(e.to_string()))?;
            for slot in decoded {
                match slot {
                    Some(values) => {
                        rows.push(Some(Row::from_values(Arc::clone(&schema), values)?));
                        live += 1;
                    }
                    None => rows.push(None),
                }
            }
        }
        inner.rows = rows;
        inner.live = live;
        inner.dirty = false;
        Ok(())
    }

    /// Remove a table's data file and schema sidecar.
    pub fn drop_files(path: &Path) -> Result<(), EngineError> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        let sidecar = Schema::sidecar_path(path);
        if sidecar.exists() {
            fs::remove_file(sidecar)?;
        }
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(table = %self.path.display(), error = %e, "flush on close failed");
        }
    }
}

/// Ordering of two rows on an index key tuple. NULL sorts first;
/// incomparable kinds compare equal so the sort stays total.
fn key_tuple_cmp(a: &Row, b: &Row, key_cols: &[usize]) -> Ordering {
    for &c in key_cols {
        let (va, vb) = match (a.get(c), b.get(c)) {
            (Ok(x), Ok(y)) => (x, y),
            _ => return Ordering::Equal,
        };
        let ord = match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => va.compare(vb).unwrap_or(Ordering::Equal),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Split a scan expression into the optional index hint and WHERE body.
fn parse_scan_expr(expr: &str) -> (Option<(String, bool)>, &str) {
    let expr = expr.trim();
    let mut hint = None;
    let mut rest = expr;
    if rest.len() >= 9 && rest.is_char_boundary(9) && rest[..9].eq_ignore_ascii_case("USE INDEX") {
        let after = rest[9..].trim_start();
        if let Some(body) = after.strip_prefix('(') {
            if let Some(close) = body.find(')') {
                let inner = body[..close].trim();
                let (name, desc) = match inner.rsplit_once(' ') {
                    Some((n, d)) if d.eq_ignore_ascii_case("DESC") => (n.trim(), true),
                    Some((n, d)) if d.eq_ignore_ascii_case("ASC") => (n.trim(), false),
                    _ => (inner, false),
                };
                hint = Some((name.to_string(), desc));
                rest = body[close + 1..].trim_start();
            }
        }
    }
    if rest.len() >= 5 && rest.is_char_boundary(5) && rest[..5].eq_ignore_ascii_case("WHERE") {
        rest = rest[5..].trim_start();
    }
    (hint, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    fn schema() -> Schema {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("category", DataType::Text)
            .add_column("qty", DataType::Integer)
            .add_index("primary", &["id"]);
        s
    }

    fn make_row(schema: &Arc<Schema>, id: i64, category: &str, qty: i64) -> Row {
        Row::from_values(
            Arc::clone(schema),
            vec![
                Value::Integer(id),
                Value::Text(category.into()),
                Value::Integer(qty),
            ],
        )
        .unwrap()
    }

    fn seeded_table(dir: &Path) -> Table {
        let path = dir.join("t.flintdb");
        let table = Table::open(&path, Some(&schema())).unwrap();
        let m = table.meta();
        for (id, cat, qty) in [(2, "fruit", 20), (1, "fruit", 10), (3, "veg", 5)] {
            table.apply(&make_row(&m, id, cat, qty), false).unwrap();
        }
        table
    }

    #[test]
    fn test_open_apply_find_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let table = seeded_table(dir.path());
        assert_eq!(table.rows(), 3);

        // Point lookup through the primary index.
        let mut cr = table.find("USE INDEX(primary) WHERE id = 2").unwrap();
        let rid = cr.next().unwrap();
        assert!(cr.next().is_none());
        let row = table.read(rid).unwrap();
        assert_eq!(row.get(2).unwrap(), &Value::Integer(20));
    }

    #[test]
    fn test_find_orders_by_index_key() {
        let dir = tempfile::tempdir().unwrap();
        let table = seeded_table(dir.path());
        let mut cr = table.find("USE INDEX(primary)").unwrap();
        let mut ids = Vec::new();
        while let Some(rid) = cr.next() {
            ids.push(table.read(rid).unwrap().get(0).unwrap().as_int().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3]);

        let mut cr = table.find("USE INDEX(primary DESC)").unwrap();
        let first = cr.next().unwrap();
        assert_eq!(
            table.read(first).unwrap().get(0).unwrap(),
            &Value::Integer(3)
        );
    }

    #[test]
    fn test_residual_filter() {
        let dir = tempfile::tempdir().unwrap();
        let table = seeded_table(dir.path());
        let mut cr = table
            .find("USE INDEX(primary) WHERE id >= 1 AND category = 'fruit'")
            .unwrap();
        let mut count = 0;
        while let Some(rid) = cr.next() {
            let row = table.read(rid).unwrap();
            assert_eq!(row.get(1).unwrap(), &Value::Text("fruit".into()));
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_upsert_and_duplicate_key() {
        let dir = tempfile::tempdir().unwrap();
        let table = seeded_table(dir.path());
        let m = table.meta();
        let dup = make_row(&m, 2, "fruit", 99);
        assert!(table.apply(&dup, false).is_err());
        table.apply(&dup, true).unwrap();
        assert_eq!(table.rows(), 3);

        let mut cr = table.find("WHERE id = 2").unwrap();
        let rid = cr.next().unwrap();
        assert_eq!(
            table.read(rid).unwrap().get(2).unwrap(),
            &Value::Integer(99)
        );
    }

    #[test]
    fn test_flush_reload_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.flintdb");
        {
            let table = Table::open(&path, Some(&schema())).unwrap();
            let m = table.meta();
            table.apply(&make_row(&m, 7, "fruit", 1), false).unwrap();
            table.flush().unwrap();
        }
        let table = Table::open(&path, None).unwrap();
        assert_eq!(table.rows(), 1);

        // Unflushed changes disappear on reload.
        let m = table.meta();
        table.apply(&make_row(&m, 8, "veg", 2), false).unwrap();
        table.reload().unwrap();
        assert_eq!(table.rows(), 1);
    }

    #[test]
    fn test_delete_at() {
        let dir = tempfile::tempdir().unwrap();
        let table = seeded_table(dir.path());
        let mut cr = table.find("WHERE id = 1").unwrap();
        let rid = cr.next().unwrap();
        table.delete_at(rid).unwrap();
        assert_eq!(table.rows(), 2);
        assert!(table.read(rid).is_err());
        assert!(table.delete_at(rid).is_err());
    }
}
