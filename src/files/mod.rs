//! Flat-file access: CSV/TSV/JSONL codecs behind a format registry keyed by
//! file extension. Every codec exposes the same handle shape as a table
//! (meta/rows/bytes/find/write) so the dispatcher treats both uniformly.

mod jsonl;
mod text;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::core::{EngineError, Row, Schema};
use crate::filter::Filter;

pub use jsonl::JsonlCodec;
pub use text::TextCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Binary table storage (`.flintdb`).
    Flint,
    Csv,
    Tsv,
    Jsonl,
    Parquet,
    Unknown,
}

impl FileFormat {
    /// Detect a format from the file extension.
    pub fn detect(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".flintdb") {
            Self::Flint
        } else if lower.ends_with(".csv") {
            Self::Csv
        } else if lower.ends_with(".tsv") || lower.ends_with(".tbl") {
            Self::Tsv
        } else if lower.ends_with(".jsonl") || lower.ends_with(".ndjson") {
            Self::Jsonl
        } else if lower.ends_with(".parquet") {
            Self::Parquet
        } else {
            Self::Unknown
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Flint => "table",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Jsonl => "jsonl",
            Self::Parquet => "parquet",
            Self::Unknown => "unknown",
        }
    }
}

/// Record codec for one flat-file format.
pub trait RecordCodec: Send {
    /// Derive a schema when no `.desc` sidecar exists, typically from the
    /// header line or first record.
    fn derive_schema(&self, path: &Path, sample: &str) -> Result<Schema, EngineError>;

    /// True when the first line of the file is a header, not data.
    fn has_header(&self, schema: &Schema) -> bool;

    fn decode(&self, line: &str, schema: &Arc<Schema>) -> Result<Row, EngineError>;

    fn encode(&self, row: &Row) -> Result<String, EngineError>;

    /// Header line to emit when creating a fresh file, if the format has one.
    fn header_line(&self, schema: &Schema) -> Option<String>;
}

/// Registry lookup. Parquet is a recognized format with no built-in codec;
/// its slot is reserved for an external plugin.
pub fn codec_for(format: FileFormat) -> Result<Box<dyn RecordCodec>, EngineError> {
    match format {
        FileFormat::Csv => Ok(Box::new(TextCodec::new(','))),
        FileFormat::Tsv => Ok(Box::new(TextCodec::new('\t'))),
        FileFormat::Jsonl => Ok(Box::new(JsonlCodec)),
        FileFormat::Parquet => Err(EngineError::NotSupported(
            "no codec registered for parquet files".into(),
        )),
        FileFormat::Flint => Err(EngineError::Execution(
            "binary tables do not go through the flat-file registry".into(),
        )),
        FileFormat::Unknown => Err(EngineError::NotSupported(
            "unable to detect file format".into(),
        )),
    }
}

/// An open flat file.
pub struct GenericFile {
    path: std::path::PathBuf,
    format: FileFormat,
    codec: Box<dyn RecordCodec>,
    schema: Arc<Schema>,
}

impl GenericFile {
    pub fn open(path: &Path, schema: Option<&Schema>) -> Result<Self, EngineError> {
        let format = FileFormat::detect(&path.display().to_string());
        let codec = codec_for(format)?;

        let schema: Arc<Schema> = if Schema::sidecar_path(path).exists() {
            Schema::open(path)?
        } else if let Some(s) = schema {
            Arc::new(s.clone())
        } else {
            if !path.exists() {
                return Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                )));
            }
            let text = fs::read_to_string(path)?;
            let sample = text.lines().next().unwrap_or("");
            Arc::new(codec.derive_schema(path, sample)?)
        };

        Ok(Self {
            path: path.to_path_buf(),
            format,
            codec,
            schema,
        })
    }

    pub fn meta(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn bytes(&self) -> Result<i64, EngineError> {
        Ok(fs::metadata(&self.path).map(|m| m.len() as i64).unwrap_or(0))
    }

    /// Row count if the codec can know it without decoding; text formats
    /// report unknown (-1).
    pub fn rows(&self) -> Result<i64, EngineError> {
        Ok(-1)
    }

    /// Raw line-terminator count for the COUNT(*) fast path, header-aware,
    /// no record decoding.
    pub fn count_lines(&self) -> Result<i64, EngineError> {
        let bytes = fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(0);
        }
        let mut rows = bytes.iter().filter(|&&b| b == b'\n').count() as i64;
        if *bytes.last().unwrap() != b'\n' {
            rows += 1;
        }
        if self.codec.has_header(&self.schema) && rows > 0 {
            rows -= 1;
        }
        Ok(rows)
    }

    /// Scan records matching a WHERE fragment. The whole predicate is
    /// residual here: flat files have no index to seek.
    pub fn find(self, where_clause: &str) -> Result<FileRows, EngineError> {
        let filter = Filter::compile(where_clause, &self.schema)?;
        let text = fs::read_to_string(&self.path)?;
        let skip_header = self.codec.has_header(&self.schema);
        Ok(FileRows {
            file: self,
            lines: text,
            pos: 0,
            skip_header,
            filter,
            current: None,
        })
    }

    /// Append one record, creating the file (with header) when absent.
    pub fn write(&mut self, row: &Row) -> Result<i64, EngineError> {
        use std::io::Write as _;
        let fresh = !self.path.exists()
            || fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if fresh {
            if let Some(header) = self.codec.header_line(&self.schema) {
                writeln!(f, "{header}")?;
            }
        }
        writeln!(f, "{}", self.codec.encode(row)?)?;
        Ok(1)
    }

    /// Remove a flat file and its sidecar.
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

/// Lazily decoded record stream over an open flat file. Each `next`
/// invalidates the previously returned row.
pub struct FileRows {
    file: GenericFile,
    lines: String,
    pos: usize,
    skip_header: bool,
    filter: Option<Filter>,
    current: Option<Row>,
}

impl FileRows {
    pub fn schema(&self) -> Arc<Schema> {
        self.file.meta()
    }

    pub fn next(&mut self) -> Result<Option<&Row>, EngineError> {
        loop {
            let rest = &self.lines[self.pos..];
            if rest.is_empty() {
                return Ok(None);
            }
            let (line, advance) = match rest.find('\n') {
                Some(i) => (&rest[..i], i + 1),
                None => (rest, rest.len()),
            };
            self.pos += advance;

            let line = line.trim_end_matches('\r');
            if self.skip_header {
                self.skip_header = false;
                continue;
            }
            if line.is_empty() {
                continue;
            }
            let row = self.file.codec.decode(line, &self.file.schema)?;
            if let Some(f) = &self.filter {
                if !f.matches(&row)? {
                    continue;
                }
            }
            self.current = Some(row);
            return Ok(self.current.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(FileFormat::detect("a/b/t.flintdb"), FileFormat::Flint);
        assert_eq!(FileFormat::detect("T.CSV"), FileFormat::Csv);
        assert_eq!(FileFormat::detect("x.tbl"), FileFormat::Tsv);
        assert_eq!(FileFormat::detect("x.jsonl"), FileFormat::Jsonl);
        assert_eq!(FileFormat::detect("x.parquet"), FileFormat::Parquet);
        assert_eq!(FileFormat::detect("x.bin"), FileFormat::Unknown);
    }

    #[test]
    fn test_parquet_reports_unregistered() {
        assert!(matches!(
            codec_for(FileFormat::Parquet),
            Err(EngineError::NotSupported(_))
        ));
    }

    #[test]
    fn test_csv_scan_with_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "id,name\n1,alice\n2,bob\n3,carol\n").unwrap();
        let gf = GenericFile::open(&path, None).unwrap();
        assert_eq!(gf.meta().columns.len(), 2);

        let mut rows = gf.find("name <> 'bob'").unwrap();
        let mut seen = Vec::new();
        while let Some(r) = rows.next().unwrap() {
            seen.push(r.display_value(1));
        }
        assert_eq!(seen, vec!["alice", "carol"]);
    }

    #[test]
    fn test_count_lines_header_aware() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "id,name\n1,a\n2,b").unwrap();
        let gf = GenericFile::open(&path, None).unwrap();
        assert_eq!(gf.count_lines().unwrap(), 2);
    }
}
