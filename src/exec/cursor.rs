//! Row cursors, the composable pipeline stages.
//!
//! A cursor yields *borrowed* rows: the `&Row` returned by `next` lives
//! until the next call on the same cursor or until the cursor drops, which
//! the borrow checker enforces. Consumers that need a row beyond that point
//! clone it. Cursors own and reuse their decode/projection buffers.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::{EngineError, Row, Schema};
use crate::files::FileRows;
use crate::limit::Limit;
use crate::sort::Filesort;
use crate::storage::RowIdCursor;

use super::pool::TableHandle;

pub trait RowCursor {
    fn next(&mut self) -> Result<Option<&Row>, EngineError>;
}

/// Column projection in SELECT order. `None` at the call sites means
/// `SELECT *`: storage order passes through untouched, which also enables
/// the streaming decode path.
#[derive(Clone)]
pub struct Projection {
    indexes: Vec<usize>,
    schema: Arc<Schema>,
}

impl Projection {
    /// Build from an explicit column list. Returns an error for columns the
    /// source schema does not have.
    pub fn build(source: &Schema, columns: &[String]) -> Result<Self, EngineError> {
        let mut indexes = Vec::with_capacity(columns.len());
        let mut schema = Schema::new(&source.name);
        for name in columns {
            let idx = source
                .column_at(name)
                .ok_or_else(|| EngineError::UnknownColumn(name.clone()))?;
            indexes.push(idx);
            let src_col = &source.columns[idx];
            schema.add_column(&src_col.name, src_col.data_type);
        }
        Ok(Self {
            indexes,
            schema: Arc::new(schema),
        })
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn fill(&self, source: &Row, dest: &mut Row) -> Result<(), EngineError> {
        for (out, &src) in self.indexes.iter().enumerate() {
            dest.set(out, source.get(src)?.clone())?;
        }
        Ok(())
    }
}

/// Source cursor over a binary table: key-ordered rowids decoded lazily.
/// Without a projection the row decodes straight into a reused buffer,
/// bypassing the copy path entirely.
pub struct TableScanCursor {
    handle: TableHandle,
    ids: RowIdCursor,
    limit: Limit,
    projection: Option<Projection>,
    stream_buf: Option<Row>,
    proj_buf: Option<Row>,
}

impl TableScanCursor {
    pub fn new(
        handle: TableHandle,
        ids: RowIdCursor,
        limit: Limit,
        projection: Option<Projection>,
    ) -> Self {
        Self {
            handle,
            ids,
            limit,
            projection,
            stream_buf: None,
            proj_buf: None,
        }
    }
}

impl RowCursor for TableScanCursor {
    fn next(&mut self) -> Result<Option<&Row>, EngineError> {
        if !self.limit.remains() {
            return Ok(None);
        }
        while self.limit.should_skip() {
            if self.ids.next().is_none() {
                return Ok(None);
            }
        }
        let Some(rowid) = self.ids.next() else {
            return Ok(None);
        };

        match &self.projection {
            None => {
                if self.stream_buf.is_none() {
                    self.stream_buf = Some(Row::new(self.handle.meta()));
                }
                let buf = self.stream_buf.as_mut().unwrap();
                self.handle.read_stream(rowid, buf)?;
                Ok(self.stream_buf.as_ref())
            }
            Some(p) => {
                let source = self.handle.read(rowid)?;
                if self.proj_buf.is_none() {
                    self.proj_buf = Some(Row::new(p.schema()));
                }
                p.fill(&source, self.proj_buf.as_mut().unwrap())?;
                Ok(self.proj_buf.as_ref())
            }
        }
    }
}

/// Source cursor over a flat file: wraps the codec's record stream with
/// offset/limit governance and projection.
pub struct FileScanCursor {
    inner: FileRows,
    limit: Limit,
    projection: Option<Projection>,
    proj_buf: Option<Row>,
}

impl FileScanCursor {
    pub fn new(inner: FileRows, limit: Limit, projection: Option<Projection>) -> Self {
        Self {
            inner,
            limit,
            projection,
            proj_buf: None,
        }
    }
}

impl RowCursor for FileScanCursor {
    fn next(&mut self) -> Result<Option<&Row>, EngineError> {
        if !self.limit.remains() {
            return Ok(None);
        }
        while self.limit.should_skip() {
            if self.inner.next()?.is_none() {
                return Ok(None);
            }
        }
        if self.projection.is_none() {
            return self.inner.next();
        }
        let Some(source) = self.inner.next()? else {
            return Ok(None);
        };
        let source = source.clone();
        let p = self.projection.as_ref().unwrap();
        if self.proj_buf.is_none() {
            self.proj_buf = Some(Row::new(p.schema()));
        }
        p.fill(&source, self.proj_buf.as_mut().unwrap())?;
        Ok(self.proj_buf.as_ref())
    }
}

/// In-memory cursor over prebuilt rows (DESCRIBE, META, SHOW TABLES, fast
/// counts, group-by fast path).
pub struct ArrayCursor {
    rows: Vec<Row>,
    index: usize,
}

impl ArrayCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, index: 0 }
    }
}

impl RowCursor for ArrayCursor {
    fn next(&mut self) -> Result<Option<&Row>, EngineError> {
        let i = self.index;
        if i >= self.rows.len() {
            return Ok(None);
        }
        self.index += 1;
        Ok(Some(&self.rows[i]))
    }
}

/// DISTINCT stage: drops rows whose 31-bit hash of the selected columns was
/// seen before. Hash collisions can incorrectly deduplicate distinct rows;
/// that risk is accepted, there is no equality fallback on a hash hit.
pub struct DistinctCursor {
    inner: Box<dyn RowCursor>,
    seen: BTreeSet<u32>,
    limit: Limit,
    current: Option<Row>,
}

impl DistinctCursor {
    /// `limit` applies to the deduplicated output; the inner scan must be
    /// unbounded for dedup to see every row.
    pub fn new(inner: Box<dyn RowCursor>, limit: Limit) -> Self {
        Self {
            inner,
            seen: BTreeSet::new(),
            limit,
            current: None,
        }
    }
}

impl RowCursor for DistinctCursor {
    fn next(&mut self) -> Result<Option<&Row>, EngineError> {
        if !self.limit.remains() {
            return Ok(None);
        }
        loop {
            let owned = {
                let Some(row) = self.inner.next()? else {
                    return Ok(None);
                };
                let h = row_hash31(row);
                if self.seen.contains(&h) {
                    continue;
                }
                self.seen.insert(h);
                row.clone()
            };
            // OFFSET applies at the DISTINCT-output level.
            if self.limit.should_skip() {
                continue;
            }
            self.current = Some(owned);
            return Ok(self.current.as_ref());
        }
    }
}

/// Reader over a sorted spill file, outermost offset/limit applied here.
pub struct FilesortCursor {
    sorter: Filesort,
    index: i64,
    rows: i64,
    limit: Limit,
    current: Option<Row>,
}

impl FilesortCursor {
    pub fn new(sorter: Filesort, limit: Limit) -> Self {
        let rows = sorter.rows();
        Self {
            sorter,
            index: 0,
            rows,
            limit,
            current: None,
        }
    }
}

impl RowCursor for FilesortCursor {
    fn next(&mut self) -> Result<Option<&Row>, EngineError> {
        if !self.limit.remains() {
            return Ok(None);
        }
        while self.limit.should_skip() {
            self.index += 1;
            if self.index >= self.rows {
                return Ok(None);
            }
        }
        if self.index >= self.rows {
            return Ok(None);
        }
        let row = self.sorter.read(self.index)?;
        self.index += 1;
        self.current = Some(row);
        Ok(self.current.as_ref())
    }
}

/// Stable 31-bit hash of a row's display values, unit-separator-joined.
/// Compatible with Java's `String.hashCode` over the same text.
pub fn row_hash31(row: &Row) -> u32 {
    let mut text = String::new();
    for i in 0..row.len() {
        if i > 0 {
            text.push('\u{1F}');
        }
        text.push_str(&row.display_value(i));
    }
    let mut h: i32 = 0;
    for unit in text.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(i32::from(unit));
    }
    (h & 0x7FFF_FFFF) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Value};

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("name", DataType::Text);
        Arc::new(s)
    }

    fn row(s: &Arc<Schema>, id: i64, name: &str) -> Row {
        Row::from_values(
            Arc::clone(s),
            vec![Value::Integer(id), Value::Text(name.into())],
        )
        .unwrap()
    }

    #[test]
    fn test_java_hash_compat() {
        // "a".hashCode() == 97, "ab".hashCode() == 3105 in Java.
        let hash_of = |t: &str| {
            let mut h: i32 = 0;
            for u in t.encode_utf16() {
                h = h.wrapping_mul(31).wrapping_add(i32::from(u));
            }
            h
        };
        assert_eq!(hash_of("a"), 97);
        assert_eq!(hash_of("ab"), 3105);
        assert_eq!(hash_of(""), 0);
    }

    #[test]
    fn test_distinct_dedups_and_subsets() {
        let s = schema();
        let input = vec![
            row(&s, 1, "a"),
            row(&s, 1, "a"),
            row(&s, 2, "b"),
            row(&s, 1, "a"),
        ];
        let mut distinct =
            DistinctCursor::new(Box::new(ArrayCursor::new(input)), Limit::none());
        let mut seen = Vec::new();
        while let Some(r) = distinct.next().unwrap() {
            seen.push((r.get(0).unwrap().clone(), r.display_value(1)));
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, "a");
        assert_eq!(seen[1].1, "b");
    }

    #[test]
    fn test_distinct_applies_offset_after_dedup() {
        let s = schema();
        let input = vec![row(&s, 1, "a"), row(&s, 1, "a"), row(&s, 2, "b"), row(&s, 3, "c")];
        let mut distinct =
            DistinctCursor::new(Box::new(ArrayCursor::new(input)), Limit::new(1, 1));
        let r = distinct.next().unwrap().unwrap();
        assert_eq!(r.display_value(1), "b");
        assert!(distinct.next().unwrap().is_none());
    }

    #[test]
    fn test_array_cursor_order() {
        let s = schema();
        let mut c = ArrayCursor::new(vec![row(&s, 1, "a"), row(&s, 2, "b")]);
        assert_eq!(c.next().unwrap().unwrap().get(0).unwrap(), &Value::Integer(1));
        assert_eq!(c.next().unwrap().unwrap().get(0).unwrap(), &Value::Integer(2));
        assert!(c.next().unwrap().is_none());
    }

    #[test]
    fn test_projection_reorders_columns() {
        let s = schema();
        let p = Projection::build(&s, &["name".to_string(), "id".to_string()]).unwrap();
        let mut out = Row::new(p.schema());
        p.fill(&row(&s, 7, "x"), &mut out).unwrap();
        assert_eq!(out.get(0).unwrap(), &Value::Text("x".into()));
        assert_eq!(out.get(1).unwrap(), &Value::Integer(7));
        assert!(Projection::build(&s, &["ghost".to_string()]).is_err());
    }
}
