//! GROUP BY / aggregate SELECT path, shared by table and flat-file scans.
//!
//! Every scanned row feeds the aggregate accumulator; HAVING filters the
//! computed group rows using the predicate compiler against the result
//! schema. Without ORDER BY or LIMIT the group rows go straight out through
//! an array cursor; otherwise they spool through the external sorter.

use std::sync::Arc;

use tracing::debug;

use crate::aggregate::{Aggregate, FuncKind, FuncSpec};
use crate::core::{EngineError, Schema};
use crate::filter::Filter;
use crate::parser::{extract_alias, parse_group_by, strip_alias, Query};

use super::cursor::{ArrayCursor, RowCursor};
use super::result::SqlResult;
use super::select;

/// Parse one SELECT expression as an aggregate call: `SUM(qty) [AS alias]`.
fn parse_aggregate_expr(expr: &str) -> Result<FuncSpec, EngineError> {
    let body = strip_alias(expr);
    let open = body.find('(');
    let close = body.rfind(')');
    let (Some(open), Some(close)) = (open, close) else {
        return Err(EngineError::Parse(format!(
            "malformed aggregate expression: {expr}"
        )));
    };
    if close <= open + 1 {
        return Err(EngineError::Parse(format!(
            "malformed aggregate expression: {expr}"
        )));
    }
    let name = body[..open].trim();
    let column = body[open + 1..close].trim().to_string();
    let kind = FuncKind::parse(name)
        .ok_or_else(|| EngineError::Parse(format!("unknown aggregate function: {name}")))?;
    let alias = extract_alias(expr).unwrap_or_else(|| expr.trim().to_string());
    Ok(FuncSpec {
        kind,
        column,
        alias,
    })
}

pub(crate) fn group_select(
    q: &Query,
    mut input: Box<dyn RowCursor>,
    input_schema: Arc<Schema>,
) -> Result<SqlResult, EngineError> {
    if q.is_select_star() {
        return Err(EngineError::NotSupported(
            "SELECT * not supported with GROUP BY or aggregate functions".into(),
        ));
    }

    let group_cols = parse_group_by(q.group_by_str());

    let mut specs = Vec::new();
    for expr in &q.columns {
        let is_group_key = group_cols.iter().any(|g| g == expr.trim());
        if is_group_key {
            continue;
        }
        specs.push(parse_aggregate_expr(expr)?);
    }
    if specs.is_empty() {
        return Err(EngineError::Parse(
            "no aggregate functions found in SELECT list".into(),
        ));
    }

    let mut agg = Aggregate::new(&input_schema, &group_cols, specs)?;
    while let Some(row) = input.next()? {
        agg.row(row)?;
    }

    let result_schema = agg.result_schema();
    let mut rows = agg.compute()?;

    // HAVING compiles with the same grammar as WHERE, against the group-row
    // schema. A clause that does not compile degrades to pass-through; the
    // lenient behavior is intentional.
    if let Some(having) = &q.having {
        match Filter::compile(having, &result_schema) {
            Ok(Some(filter)) => {
                rows.retain(|row| filter.matches(row).unwrap_or(true));
            }
            Ok(None) => {}
            Err(e) => {
                debug!(having = %having, error = %e, "HAVING clause skipped");
            }
        }
    }

    // Fast path: no reordering, no limit, no spill.
    if q.order_by_str().is_empty() && q.limit_str().is_empty() {
        let affected = rows.len() as i64;
        let column_names = result_schema
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let mut result =
            SqlResult::with_cursor(Box::new(ArrayCursor::new(rows)), column_names);
        result.affected = affected;
        return Ok(result);
    }

    select::sort_rows(rows, result_schema, q.order_by_str(), q.limit_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aggregate_expr() {
        let spec = parse_aggregate_expr("SUM(qty)").unwrap();
        assert_eq!(spec.kind, FuncKind::Sum);
        assert_eq!(spec.column, "qty");
        assert_eq!(spec.alias, "SUM(qty)");

        let spec = parse_aggregate_expr("count( * ) AS n").unwrap();
        assert_eq!(spec.kind, FuncKind::Count);
        assert_eq!(spec.column, "*");
        assert_eq!(spec.alias, "n");

        assert!(parse_aggregate_expr("qty").is_err());
        assert!(parse_aggregate_expr("MEDIAN(qty)").is_err());
    }
}
