use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::EngineError;
use super::value::DataType;

/// Suffix of the schema sidecar file next to every table/flat file.
pub const META_SUFFIX: &str = ".desc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

/// Ordered-key index definition. The first declared index is the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Text formats only: whether the file starts with a header line.
    #[serde(default = "default_header")]
    pub header: bool,
}

fn default_header() -> bool {
    true
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
            header: true,
        }
    }

    pub fn add_column(&mut self, name: &str, data_type: DataType) -> &mut Self {
        self.columns.push(Column {
            name: name.to_string(),
            data_type,
            nullable: true,
            default: None,
        });
        self
    }

    pub fn add_index(&mut self, name: &str, keys: &[&str]) -> &mut Self {
        self.indexes.push(IndexDef {
            name: name.to_string(),
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
        });
        self
    }

    /// Column position by name, case-insensitive like the SQL surface.
    pub fn column_at(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn index_named(&self, name: &str) -> Option<&IndexDef> {
        if name.eq_ignore_ascii_case("primary") {
            return self.indexes.first();
        }
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Path of the sidecar descriptor for a data file.
    pub fn sidecar_path(data_path: &Path) -> PathBuf {
        let mut s = data_path.as_os_str().to_os_string();
        s.push(META_SUFFIX);
        PathBuf::from(s)
    }

    pub fn open(data_path: &Path) -> Result<Arc<Self>, EngineError> {
        let sidecar = Self::sidecar_path(data_path);
        if !sidecar.exists() {
            return Err(EngineError::MissingMetadata(
                data_path.display().to_string(),
            ));
        }
        let text = fs::read_to_string(&sidecar)?;
        let schema: Self = serde_json::from_str(&text)?;
        Ok(Arc::new(schema))
    }

    pub fn save(&self, data_path: &Path) -> Result<(), EngineError> {
        let sidecar = Self::sidecar_path(data_path);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(sidecar, text)?;
        Ok(())
    }

    /// Render the schema as a CREATE TABLE statement (the META command output).
    pub fn to_sql_string(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "CREATE TABLE {} (", self.name);
        for (i, c) in self.columns.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{} {}", c.name, c.data_type.name());
            if !c.nullable {
                out.push_str(" NOT NULL");
            }
            if let Some(d) = &c.default {
                let _ = write!(out, " DEFAULT {d}");
            }
        }
        out.push(')');
        for idx in &self.indexes {
            let _ = write!(out, " INDEX {} ({})", idx.name, idx.keys.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_lookup_case_insensitive() {
        let mut s = Schema::new("t");
        s.add_column("Id", DataType::Integer).add_column("name", DataType::Text);
        assert_eq!(s.column_at("id"), Some(0));
        assert_eq!(s.column_at("NAME"), Some(1));
        assert_eq!(s.column_at("missing"), None);
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("t.flintdb");
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("qty", DataType::Integer)
            .add_index("primary", &["id"]);
        s.save(&data).unwrap();
        let loaded = Schema::open(&data).unwrap();
        assert_eq!(*loaded, s);
    }

    #[test]
    fn test_sql_string() {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer).add_index("primary", &["id"]);
        let sql = s.to_sql_string();
        assert!(sql.starts_with("CREATE TABLE t (id INTEGER)"));
        assert!(sql.contains("INDEX primary (id)"));
    }
}
