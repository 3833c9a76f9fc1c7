//! Introspection statements: DESCRIBE, META, SHOW TABLES. Each synthesizes
//! a fixed-schema result over an array cursor.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::core::{DataType, EngineError, Row, Schema, META_SUFFIX};
use crate::files::{FileFormat, GenericFile};
use crate::parser::Query;
use crate::storage::Table;

use super::cursor::ArrayCursor;
use super::result::SqlResult;
use super::Executor;

fn text_schema(name: &str, columns: &[&str]) -> Arc<Schema> {
    let mut s = Schema::new(name);
    for c in columns {
        s.add_column(c, DataType::Text);
    }
    Arc::new(s)
}

fn target_schema(exec: &Executor, table: &str) -> Result<Arc<Schema>, EngineError> {
    if FileFormat::detect(table) == FileFormat::Flint {
        let handle = exec.pool().borrow(Path::new(table))?;
        Ok(handle.meta())
    } else {
        Ok(GenericFile::open(Path::new(table), None)?.meta())
    }
}

pub(crate) fn describe(exec: &Executor, q: &Query) -> Result<SqlResult, EngineError> {
    let meta = target_schema(exec, &q.table)?;

    let pk_columns: Vec<usize> = meta
        .indexes
        .first()
        .map(|idx| {
            idx.keys
                .iter()
                .filter_map(|k| meta.column_at(k))
                .collect()
        })
        .unwrap_or_default();

    let out_schema = text_schema("describe", &["Column", "Type", "Key", "Default"]);
    let mut rows = Vec::with_capacity(meta.columns.len());
    for (i, column) in meta.columns.iter().enumerate() {
        let mut row = Row::new(Arc::clone(&out_schema));
        row.set_string(0, &column.name)?;
        row.set_string(1, column.data_type.name())?;
        row.set_string(2, if pk_columns.contains(&i) { "PRI" } else { "" })?;
        row.set_string(3, column.default.as_deref().unwrap_or(""))?;
        rows.push(row);
    }

    let mut result = SqlResult::with_cursor(
        Box::new(ArrayCursor::new(rows)),
        vec!["Column".into(), "Type".into(), "Key".into(), "Default".into()],
    );
    result.affected = -1;
    Ok(result)
}

pub(crate) fn meta_info(exec: &Executor, q: &Query) -> Result<SqlResult, EngineError> {
    let meta = target_schema(exec, &q.table)?;
    let out_schema = text_schema("meta", &["SQL"]);
    let mut row = Row::new(Arc::clone(&out_schema));
    row.set_string(0, &meta.to_sql_string())?;
    let mut result =
        SqlResult::with_cursor(Box::new(ArrayCursor::new(vec![row])), vec!["SQL".into()]);
    result.affected = -1;
    Ok(result)
}

const SHOW_COLUMNS: [&str; 6] = ["Table", "Format", "Rows", "Bytes", "Modified", "Path"];

/// Walk a directory (recursively with `-R`) and emit one row per discovered
/// table or recognized flat file. Schema sidecars themselves are skipped.
pub(crate) fn show_tables(q: &Query) -> Result<SqlResult, EngineError> {
    let base = q.where_clause.as_deref().unwrap_or(".");
    let base_dir = PathBuf::from(base);
    if !base_dir.is_dir() {
        return Err(EngineError::Execution(format!(
            "SHOW TABLES directory not found: {base}"
        )));
    }
    let recursive = q
        .option
        .as_deref()
        .is_some_and(|o| o.eq_ignore_ascii_case("-R"));

    let out_schema = text_schema("show_tables", &SHOW_COLUMNS);
    let mut rows = Vec::new();
    let mut stack = vec![base_dir];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue; // unreadable directory, skip
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(std::fs::DirEntry::file_name);

        for entry in entries {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            let full = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                if recursive {
                    stack.push(full);
                }
                continue;
            }
            if file_name.ends_with(META_SUFFIX) {
                continue;
            }

            let format = FileFormat::detect(&file_name);
            let (rows_str, bytes) = match format {
                FileFormat::Flint => {
                    // A binary file without its descriptor is not a table.
                    if !Schema::sidecar_path(&full).exists() {
                        continue;
                    }
                    match Table::open(&full, None) {
                        Ok(t) => (t.rows().to_string(), t.bytes().unwrap_or(0)),
                        Err(_) => continue,
                    }
                }
                FileFormat::Csv | FileFormat::Tsv | FileFormat::Jsonl | FileFormat::Parquet => {
                    (String::new(), metadata.len() as i64)
                }
                FileFormat::Unknown => continue,
            };

            let modified = metadata
                .modified()
                .map(|t| {
                    DateTime::<Local>::from(t)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string()
                })
                .unwrap_or_default();

            let mut row = Row::new(Arc::clone(&out_schema));
            row.set_string(0, &file_name)?;
            row.set_string(1, format.name())?;
            row.set_string(2, &rows_str)?;
            row.set_string(3, &bytes_human(bytes))?;
            row.set_string(4, &modified)?;
            row.set_string(5, &relativize(&full))?;
            rows.push(row);
        }
    }

    let affected = rows.len() as i64;
    let mut result = SqlResult::with_cursor(
        Box::new(ArrayCursor::new(rows)),
        SHOW_COLUMNS.iter().map(|&c| c.to_string()).collect(),
    );
    result.affected = affected;
    Ok(result)
}

/// Human-readable byte size: 1.50KB, 12.3MB, 256MB.
fn bytes_human(bytes: i64) -> String {
    if bytes < 0 {
        return String::new();
    }
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut v = bytes as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if v < 10.0 {
        format!("{v:.2}{}", UNITS[unit])
    } else if v < 100.0 {
        format!("{v:.1}{}", UNITS[unit])
    } else {
        format!("{v:.0}{}", UNITS[unit])
    }
}

fn relativize(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(&cwd).ok())
        .map_or_else(|| path.display().to_string(), |p| p.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_human() {
        assert_eq!(bytes_human(0), "0.00B");
        assert_eq!(bytes_human(1536), "1.50KB");
        assert_eq!(bytes_human(10 * 1024 * 1024), "10.0MB");
        assert_eq!(bytes_human(-1), "");
    }
}
