//! INSERT/REPLACE, UPDATE, DELETE, bulk INSERT ... FROM, and the schema
//! operations CREATE/DROP.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::core::{DataType, EngineError, Row, Schema, Value};
use crate::files::{FileFormat, GenericFile};
use crate::parser::{split_top_level_commas, Query, StatementKind};
use crate::storage::Table;

use super::select::indexable_where;
use super::Executor;

/// Fill declared column defaults before explicit values land.
fn row_with_defaults(meta: &Arc<Schema>) -> Result<Row, EngineError> {
    let mut row = Row::new(Arc::clone(meta));
    for (i, column) in meta.columns.iter().enumerate() {
        if let Some(default) = &column.default {
            row.set(i, Value::from_literal(default, column.data_type)?)?;
        }
    }
    Ok(row)
}

pub(crate) fn insert(exec: &Executor, q: &Query) -> Result<i64, EngineError> {
    let handle = exec.pool().borrow(Path::new(&q.table))?;
    let meta = handle.meta();
    let upsert = q.kind() == StatementKind::Replace;

    let mut row = row_with_defaults(&meta)?;
    if q.columns.is_empty() {
        // INSERT INTO t VALUES (...): values for every column, in order.
        if q.values.len() != meta.columns.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "number of values ({}) does not match number of table columns ({})",
                q.values.len(),
                meta.columns.len()
            )));
        }
        for (i, raw) in q.values.iter().enumerate() {
            row.set(i, Value::from_literal(raw, meta.columns[i].data_type)?)?;
        }
    } else {
        if q.values.len() != q.columns.len() {
            return Err(EngineError::Parse(format!(
                "number of values ({}) does not match number of columns ({})",
                q.values.len(),
                q.columns.len()
            )));
        }
        for (name, raw) in q.columns.iter().zip(&q.values) {
            let idx = meta
                .column_at(name)
                .ok_or_else(|| EngineError::UnknownColumn(name.clone()))?;
            row.set(idx, Value::from_literal(raw, meta.columns[idx].data_type)?)?;
        }
    }

    handle.apply(&row, upsert)?;
    Ok(1)
}

pub(crate) fn update(exec: &Executor, q: &Query) -> Result<i64, EngineError> {
    if q.where_str().is_empty() {
        return Err(EngineError::GuardedMutation("UPDATE"));
    }
    if q.columns.is_empty() || q.values.is_empty() {
        return Err(EngineError::Parse(
            "no columns/values specified for UPDATE".into(),
        ));
    }
    if q.columns.len() != q.values.len() {
        return Err(EngineError::Parse(format!(
            "number of columns ({}) does not match number of values ({})",
            q.columns.len(),
            q.values.len()
        )));
    }

    let handle = exec.pool().borrow(Path::new(&q.table))?;
    let meta = handle.meta();

    let mut targets = Vec::with_capacity(q.columns.len());
    for name in &q.columns {
        let idx = meta
            .column_at(name)
            .ok_or_else(|| EngineError::UnknownColumn(name.clone()))?;
        targets.push((idx, meta.columns[idx].data_type));
    }

    let expr = indexable_where(Some(&meta), q)?;
    let mut ids = handle.find(&expr)?;
    let mut affected = 0i64;
    while let Some(rowid) = ids.next() {
        let mut row = handle.read(rowid)?;
        for (&(idx, dt), raw) in targets.iter().zip(&q.values) {
            row.set(idx, Value::from_literal(raw, dt)?)?;
        }
        handle.apply_at(rowid, &row)?;
        affected += 1;
    }
    debug!(table = %q.table, affected, "update applied");
    Ok(affected)
}

pub(crate) fn delete(exec: &Executor, q: &Query) -> Result<i64, EngineError> {
    if q.where_str().is_empty() {
        return Err(EngineError::GuardedMutation("DELETE"));
    }
    let handle = exec.pool().borrow(Path::new(&q.table))?;
    let meta = handle.meta();
    let expr = indexable_where(Some(&meta), q)?;
    let mut ids = handle.find(&expr)?;
    let mut affected = 0i64;
    while let Some(rowid) = ids.next() {
        handle.delete_at(rowid)?;
        affected += 1;
    }
    debug!(table = %q.table, affected, "delete applied");
    Ok(affected)
}

/// `INSERT/REPLACE INTO <target> [(cols)] FROM <source>`: run a SELECT over
/// the source and copy each row, re-mapping columns when a list is given.
/// The target may be a binary table or a writable flat file.
pub(crate) fn insert_from(exec: &Executor, q: &Query) -> Result<i64, EngineError> {
    let source = q.from.as_deref().unwrap_or_default();
    let target = &q.table;
    let fmt = FileFormat::detect(target);
    let upsert = q.kind() == StatementKind::Replace;

    if !Path::new(source).exists() {
        return Err(EngineError::Execution(format!(
            "source file for INSERT ... FROM does not exist: {source}"
        )));
    }
    if matches!(fmt, FileFormat::Parquet | FileFormat::Unknown) {
        return Err(EngineError::NotSupported(format!(
            "INSERT ... FROM target format is not writable: {target}"
        )));
    }

    let meta = Schema::open(Path::new(target))?;
    if meta.columns.is_empty() {
        return Err(EngineError::MissingMetadata(target.clone()));
    }

    let mapping: Option<Vec<usize>> = if q.columns.is_empty() {
        None
    } else {
        let mut m = Vec::with_capacity(q.columns.len());
        for name in &q.columns {
            m.push(
                meta.column_at(name)
                    .ok_or_else(|| EngineError::UnknownColumn(name.clone()))?,
            );
        }
        Some(m)
    };

    // Source rows come from a nested SELECT so the source may itself be a
    // table or any readable flat file.
    let mut expr = if q.columns.is_empty() {
        format!("SELECT * FROM {source}")
    } else {
        format!("SELECT {} FROM {source}", q.columns.join(", "))
    };
    if !q.where_str().is_empty() {
        expr.push_str(" WHERE ");
        expr.push_str(q.where_str());
    }
    if !q.order_by_str().is_empty() {
        expr.push_str(" ORDER BY ");
        expr.push_str(q.order_by_str());
    }
    if !q.limit_str().is_empty() {
        expr.push_str(" LIMIT ");
        expr.push_str(q.limit_str());
    }
    debug!(select = %expr, "bulk copy source query");
    let mut src = exec.execute(&expr, None)?;

    let mut affected = 0i64;
    if fmt == FileFormat::Flint {
        let handle = exec.pool().borrow(Path::new(target))?;
        while let Some(row) = src.next_row()? {
            let mut out = Row::new(Arc::clone(&meta));
            fill_target_row(&mut out, row, mapping.as_deref(), &meta)?;
            handle.apply(&out, upsert)?;
            affected += 1;
        }
    } else {
        let mut gf = GenericFile::open(Path::new(target), Some(&*meta))?;
        while let Some(row) = src.next_row()? {
            let mut out = Row::new(Arc::clone(&meta));
            fill_target_row(&mut out, row, mapping.as_deref(), &meta)?;
            gf.write(&out)?;
            affected += 1;
        }
    }
    Ok(affected)
}

fn fill_target_row(
    out: &mut Row,
    source: &Row,
    mapping: Option<&[usize]>,
    meta: &Arc<Schema>,
) -> Result<(), EngineError> {
    match mapping {
        Some(m) => {
            for (i, &target_idx) in m.iter().enumerate() {
                out.set(target_idx, source.get(i)?.clone())?;
            }
        }
        None => {
            if source.len() != meta.columns.len() {
                return Err(EngineError::SchemaMismatch(format!(
                    "source has {} columns, target '{}' has {}",
                    source.len(),
                    meta.name,
                    meta.columns.len()
                )));
            }
            for i in 0..source.len() {
                out.set(i, source.get(i)?.clone())?;
            }
        }
    }
    Ok(())
}

pub(crate) fn create(q: &Query) -> Result<i64, EngineError> {
    let path = Path::new(&q.table);
    if path.exists() {
        return Err(EngineError::Execution(format!(
            "table file already exists: {}",
            q.table
        )));
    }
    if FileFormat::detect(&q.table) != FileFormat::Flint {
        return Err(EngineError::NotSupported(format!(
            "CREATE operation not yet supported for non-binary file formats, {}",
            q.table
        )));
    }
    let schema = schema_from_definition(&q.table, &q.definition)?;
    let table = Table::open(path, Some(&schema))?;
    table.flush()?;
    Ok(1)
}

pub(crate) fn drop_table(q: &Query) -> Result<i64, EngineError> {
    let path = Path::new(&q.table);
    if !path.exists() {
        return Err(EngineError::TableNotFound(q.table.clone()));
    }
    if FileFormat::detect(&q.table) == FileFormat::Flint {
        Table::drop_files(path)?;
    } else {
        GenericFile::drop_files(path)?;
    }
    Ok(1)
}

/// Build a schema from CREATE TABLE definition entries:
/// `name TYPE [NOT NULL] [DEFAULT literal] [PRIMARY KEY]`,
/// `PRIMARY KEY (a, b)`, `INDEX name (a, b)`.
fn schema_from_definition(table: &str, defs: &[String]) -> Result<Schema, EngineError> {
    let name = Path::new(table)
        .file_stem()
        .map_or_else(|| table.to_string(), |s| s.to_string_lossy().into_owned());
    let mut schema = Schema::new(&name);
    let mut inline_pk: Vec<String> = Vec::new();

    for def in defs {
        let def = def.trim();
        let upper = def.to_ascii_uppercase();

        if upper.starts_with("PRIMARY KEY") {
            let keys = paren_list(def)?;
            schema.indexes.insert(
                0,
                crate::core::IndexDef {
                    name: "primary".into(),
                    keys,
                },
            );
            continue;
        }
        if upper.starts_with("INDEX") {
            let idx_name = def
                .split_whitespace()
                .nth(1)
                .map(|t| t.trim_end_matches('(').to_string())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| EngineError::Parse(format!("malformed index definition: {def}")))?;
            let keys = paren_list(def)?;
            schema.indexes.push(crate::core::IndexDef {
                name: idx_name,
                keys,
            });
            continue;
        }

        let mut tokens = def.split_whitespace();
        let col_name = tokens
            .next()
            .ok_or_else(|| EngineError::Parse("empty column definition".into()))?;
        let type_token = tokens
            .next()
            .ok_or_else(|| EngineError::Parse(format!("column '{col_name}' has no type")))?;
        let data_type = DataType::parse(type_token)?;

        let mut nullable = true;
        let mut default = None;
        let rest: Vec<&str> = tokens.collect();
        let mut i = 0;
        while i < rest.len() {
            let t = rest[i].to_ascii_uppercase();
            match t.as_str() {
                "NOT" if rest.get(i + 1).is_some_and(|n| n.eq_ignore_ascii_case("NULL")) => {
                    nullable = false;
                    i += 2;
                }
                "PRIMARY" if rest.get(i + 1).is_some_and(|n| n.eq_ignore_ascii_case("KEY")) => {
                    inline_pk.push(col_name.to_string());
                    i += 2;
                }
                "DEFAULT" => {
                    let v = rest
                        .get(i + 1)
                        .ok_or_else(|| EngineError::Parse(format!("DEFAULT without value: {def}")))?;
                    default = Some((*v).trim_matches(|c| c == '\'' || c == '"').to_string());
                    i += 2;
                }
                _ => {
                    return Err(EngineError::Parse(format!(
                        "unexpected token in column definition: {def}"
                    )));
                }
            }
        }

        schema.columns.push(crate::core::Column {
            name: col_name.to_string(),
            data_type,
            nullable,
            default,
        });
    }

    if !inline_pk.is_empty() && schema.index_named("primary").is_none() {
        schema.indexes.insert(
            0,
            crate::core::IndexDef {
                name: "primary".into(),
                keys: inline_pk,
            },
        );
    }
    if schema.columns.is_empty() {
        return Err(EngineError::Parse(
            "CREATE TABLE requires at least one column".into(),
        ));
    }
    for index in &schema.indexes {
        for key in &index.keys {
            if schema.column_at(key).is_none() {
                return Err(EngineError::UnknownColumn(key.clone()));
            }
        }
    }
    Ok(schema)
}

fn paren_list(def: &str) -> Result<Vec<String>, EngineError> {
    let open = def
        .find('(')
        .ok_or_else(|| EngineError::Parse(format!("expected '(' in: {def}")))?;
    let close = def
        .rfind(')')
        .ok_or(EngineError::MissingClosingParenthesis)?;
    Ok(split_top_level_commas(&def[open + 1..close]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_from_definition() {
        let defs = vec![
            "id INT NOT NULL".to_string(),
            "name VARCHAR(64) DEFAULT 'anon'".to_string(),
            "qty INT".to_string(),
            "PRIMARY KEY (id)".to_string(),
            "INDEX by_name (name)".to_string(),
        ];
        let s = schema_from_definition("data/t.flintdb", &defs).unwrap();
        assert_eq!(s.name, "t");
        assert_eq!(s.columns.len(), 3);
        assert!(!s.columns[0].nullable);
        assert_eq!(s.columns[1].default.as_deref(), Some("anon"));
        assert_eq!(s.indexes[0].name, "primary");
        assert_eq!(s.indexes[0].keys, vec!["id"]);
        assert_eq!(s.indexes[1].name, "by_name");
    }

    #[test]
    fn test_inline_primary_key() {
        let defs = vec!["id INT PRIMARY KEY".to_string(), "v TEXT".to_string()];
        let s = schema_from_definition("t.flintdb", &defs).unwrap();
        assert_eq!(s.indexes[0].keys, vec!["id"]);
    }

    #[test]
    fn test_bad_definitions() {
        assert!(schema_from_definition("t.flintdb", &["id".to_string()]).is_err());
        assert!(
            schema_from_definition("t.flintdb", &["id WIDGET".to_string()]).is_err()
        );
        assert!(schema_from_definition(
            "t.flintdb",
            &["id INT".to_string(), "PRIMARY KEY (ghost)".to_string()]
        )
        .is_err());
    }
}
