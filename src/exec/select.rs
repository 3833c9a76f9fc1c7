//! SELECT execution paths: storage-backed scans, flat-file scans, the
//! COUNT(*) fast paths, and the external-sort stage for ORDER BY.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::core::{DataType, EngineError, Row, Schema, Value};
use crate::files::GenericFile;
use crate::filter::best_index;
use crate::limit::Limit;
use crate::parser::{extract_alias, parse_order_by, strip_alias, Query};
use crate::sort::{multi_key_comparator, temp_sort_path, Filesort};

use super::cursor::{
    ArrayCursor, DistinctCursor, FileScanCursor, Projection, RowCursor, TableScanCursor,
};
use super::result::SqlResult;
use super::{groupby, Executor};

/// Aggregate-call detection over the SELECT expressions.
pub(crate) fn has_aggregate_function(q: &Query) -> bool {
    const MARKERS: [&str; 11] = [
        "COUNT(",
        "SUM(",
        "AVG(",
        "MIN(",
        "MAX(",
        "FIRST(",
        "LAST(",
        "DISTINCT_COUNT(",
        "DISTINCT_HLL_COUNT(",
        "HLL_COUNT(",
        "HLL_SUM(",
    ];
    q.columns.iter().any(|expr| {
        let normalized: String = expr
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        MARKERS.iter().any(|m| normalized.contains(m))
    })
}

/// `SELECT COUNT(*|1|0) [alias]` detection. Returns the output column name.
pub(crate) fn parse_count_expr(expr: &str) -> Option<String> {
    let body: String = strip_alias(expr)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    let inner = body.strip_prefix("COUNT(")?.strip_suffix(')')?;
    if !matches!(inner, "*" | "1" | "0") {
        return None;
    }
    Some(extract_alias(expr).unwrap_or_else(|| "COUNT(*)".to_string()))
}

fn count_fast_path_applies(q: &Query) -> bool {
    q.columns.len() == 1
        && q.where_str().is_empty()
        && q.group_by_str().is_empty()
        && q.order_by_str().is_empty()
        && !q.distinct
}

/// Combined scan expression for the storage engine: explicit `USE INDEX`
/// hint wins, otherwise the best-index heuristic picks one.
pub(crate) fn indexable_where(
    schema: Option<&Schema>,
    q: &Query,
) -> Result<String, EngineError> {
    let mut out = String::new();
    if let Some(hint) = &q.index {
        out = format!("USE INDEX({hint})");
    } else if let Some(meta) = schema {
        if !meta.indexes.is_empty() {
            if let Some(i) = best_index(q.where_str(), q.order_by_str(), meta)? {
                out = format!("USE INDEX({})", meta.indexes[i].name);
            }
        }
    }
    if !q.where_str().is_empty() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str("WHERE ");
        out.push_str(q.where_str());
    }
    Ok(out)
}

/// One-row COUNT result honoring LIMIT/OFFSET (a count emits at most one
/// row, so any positive offset hides it).
fn fast_count_result(alias: &str, count: i64, limit_str: &str) -> Result<SqlResult, EngineError> {
    let limit = Limit::parse(limit_str);
    let visible = limit.visible(1);

    let mut schema = Schema::new("count");
    schema.add_column(alias, DataType::Integer);
    let schema = Arc::new(schema);

    let mut rows = Vec::new();
    if visible > 0 {
        let mut row = Row::new(Arc::clone(&schema));
        row.set(0, Value::Integer(count))?;
        rows.push(row);
    }
    let mut result = SqlResult::with_cursor(
        Box::new(ArrayCursor::new(rows)),
        vec![alias.to_string()],
    );
    result.affected = visible;
    Ok(result)
}

pub(crate) fn select_table(exec: &Executor, q: &Query) -> Result<SqlResult, EngineError> {
    let handle = exec.pool().borrow(Path::new(&q.table))?;

    if count_fast_path_applies(q) {
        if let Some(alias) = parse_count_expr(&q.columns[0]) {
            debug!(table = %q.table, "COUNT fast path via table metadata");
            let count = handle.rows();
            return fast_count_result(&alias, count, q.limit_str());
        }
    }

    let meta = handle.meta();
    let expr = indexable_where(Some(&meta), q)?;
    let ids = handle.find(&expr)?;

    if !q.group_by_str().is_empty() || has_aggregate_function(q) {
        let scan = TableScanCursor::new(handle, ids, Limit::none(), None);
        return groupby::group_select(q, Box::new(scan), meta);
    }

    let projection = if q.is_select_star() {
        None
    } else {
        Some(Projection::build(&meta, &q.columns)?)
    };
    let column_names = projection.as_ref().map_or_else(
        || meta.columns.iter().map(|c| c.name.clone()).collect(),
        Projection::column_names,
    );

    if !q.order_by_str().is_empty() {
        let scan = TableScanCursor::new(handle, ids, Limit::none(), projection);
        let mut cursor: Box<dyn RowCursor> = Box::new(scan);
        if q.distinct {
            // DISTINCT before the sort; the sorter applies LIMIT.
            cursor = Box::new(DistinctCursor::new(cursor, Limit::none()));
        }
        return sort_cursor(cursor, q.order_by_str(), q.limit_str());
    }

    let scan_limit = if q.distinct {
        Limit::none() // deferred: dedup must see the unbounded stream
    } else {
        Limit::parse(q.limit_str())
    };
    let scan = TableScanCursor::new(handle, ids, scan_limit, projection);
    let mut cursor: Box<dyn RowCursor> = Box::new(scan);
    if q.distinct {
        cursor = Box::new(DistinctCursor::new(cursor, Limit::parse(q.limit_str())));
    }
    Ok(SqlResult::with_cursor(cursor, column_names))
}

pub(crate) fn select_file(q: &Query) -> Result<SqlResult, EngineError> {
    let path = Path::new(&q.table);

    if count_fast_path_applies(q) {
        if let Some(alias) = parse_count_expr(&q.columns[0]) {
            let gf = GenericFile::open(path, None)?;
            let known = gf.rows()?;
            let count = if known >= 0 { known } else { gf.count_lines()? };
            debug!(file = %q.table, count, "COUNT fast path via raw byte scan");
            return fast_count_result(&alias, count, q.limit_str());
        }
    }

    let gf = GenericFile::open(path, None)?;
    let meta = gf.meta();
    let records = gf.find(q.where_str())?;

    if !q.group_by_str().is_empty() || has_aggregate_function(q) {
        let scan = FileScanCursor::new(records, Limit::none(), None);
        return groupby::group_select(q, Box::new(scan), meta);
    }

    let projection = if q.is_select_star() {
        None
    } else {
        Some(Projection::build(&meta, &q.columns)?)
    };
    let column_names = projection.as_ref().map_or_else(
        || meta.columns.iter().map(|c| c.name.clone()).collect(),
        Projection::column_names,
    );

    if !q.order_by_str().is_empty() {
        let scan = FileScanCursor::new(records, Limit::none(), projection);
        let mut cursor: Box<dyn RowCursor> = Box::new(scan);
        if q.distinct {
            cursor = Box::new(DistinctCursor::new(cursor, Limit::none()));
        }
        return sort_cursor(cursor, q.order_by_str(), q.limit_str());
    }

    let scan_limit = if q.distinct {
        Limit::none()
    } else {
        Limit::parse(q.limit_str())
    };
    let scan = FileScanCursor::new(records, scan_limit, projection);
    let mut cursor: Box<dyn RowCursor> = Box::new(scan);
    if q.distinct {
        cursor = Box::new(DistinctCursor::new(cursor, Limit::parse(q.limit_str())));
    }
    Ok(SqlResult::with_cursor(cursor, column_names))
}

/// Spool a cursor into the external sorter and hand back a sorted result.
pub(crate) fn sort_cursor(
    mut cursor: Box<dyn RowCursor>,
    orderby: &str,
    limit_str: &str,
) -> Result<SqlResult, EngineError> {
    let first = match cursor.next()? {
        Some(r) => r.clone(),
        None => return Ok(SqlResult::empty()),
    };
    let schema = Arc::clone(first.schema());
    let mut sorter = Filesort::new(&temp_sort_path(), schema)?;
    sorter.add(&first)?;
    while let Some(row) = cursor.next()? {
        sorter.add(row)?;
    }
    finish_sort(sorter, orderby, limit_str)
}

/// Spool prebuilt rows (aggregate output) into the sorter.
pub(crate) fn sort_rows(
    rows: Vec<Row>,
    schema: Arc<Schema>,
    orderby: &str,
    limit_str: &str,
) -> Result<SqlResult, EngineError> {
    let mut sorter = Filesort::new(&temp_sort_path(), schema)?;
    for row in &rows {
        sorter.add(row)?;
    }
    finish_sort(sorter, orderby, limit_str)
}

fn finish_sort(
    mut sorter: Filesort,
    orderby: &str,
    limit_str: &str,
) -> Result<SqlResult, EngineError> {
    let schema = sorter.schema();
    if !orderby.trim().is_empty() {
        let parsed = parse_order_by(orderby);
        if parsed.is_empty() {
            return Err(EngineError::Parse("failed to parse ORDER BY clause".into()));
        }
        let mut specs = Vec::with_capacity(parsed.len());
        for (name, desc) in parsed {
            let idx = schema
                .column_at(&name)
                .ok_or(EngineError::UnknownColumn(name))?;
            specs.push((idx, desc));
        }
        sorter.sort(multi_key_comparator(specs))?;
    }

    let limit = Limit::parse(limit_str);
    let visible = limit.visible(sorter.rows());
    let column_names = schema.columns.iter().map(|c| c.name.clone()).collect();
    let mut result = SqlResult::with_cursor(
        Box::new(super::cursor::FilesortCursor::new(sorter, limit)),
        column_names,
    );
    result.affected = visible;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count_expr() {
        assert_eq!(parse_count_expr("COUNT(*)"), Some("COUNT(*)".into()));
        assert_eq!(parse_count_expr("count(1) total"), Some("total".into()));
        assert_eq!(parse_count_expr("COUNT( 0 ) AS n"), Some("n".into()));
        assert_eq!(parse_count_expr("COUNT(qty)"), None);
        assert_eq!(parse_count_expr("qty"), None);
    }

    #[test]
    fn test_has_aggregate_function() {
        let mut q = Query::default();
        q.columns = vec!["category".into(), "SUM(qty)".into()];
        assert!(has_aggregate_function(&q));
        q.columns = vec!["category".into(), "qty".into()];
        assert!(!has_aggregate_function(&q));
        q.columns = vec!["distinct_hll_count(id) u".into()];
        assert!(has_aggregate_function(&q));
    }
}
