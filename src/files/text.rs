//! Delimiter-separated text codec (CSV and TSV share it).

use std::path::Path;
use std::sync::Arc;

use crate::core::{DataType, EngineError, Row, Schema, Value};

use super::RecordCodec;

pub struct TextCodec {
    delimiter: char,
}

impl TextCodec {
    pub const fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    /// Split one record on the delimiter, honoring double quotes.
    fn split(&self, line: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if in_quotes {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    field.push(c);
                }
            } else if c == '"' {
                in_quotes = true;
            } else if c == self.delimiter {
                out.push(std::mem::take(&mut field));
            } else {
                field.push(c);
            }
        }
        out.push(field);
        out
    }

    fn quote(&self, s: &str) -> String {
        if s.contains(self.delimiter) || s.contains('"') || s.contains('\n') {
            format!("\"{}\"", s.replace('"', "\"\""))
        } else {
            s.to_string()
        }
    }
}

impl RecordCodec for TextCodec {
    fn derive_schema(&self, path: &Path, sample: &str) -> Result<Schema, EngineError> {
        if sample.is_empty() {
            return Err(EngineError::MissingMetadata(path.display().to_string()));
        }
        let name = path
            .file_stem()
            .map_or_else(|| "file".to_string(), |s| s.to_string_lossy().into_owned());
        let mut schema = Schema::new(&name);
        for col in self.split(sample) {
            let col = col.trim();
            if col.is_empty() {
                continue;
            }
            schema.add_column(col, DataType::Text);
        }
        if schema.columns.is_empty() {
            return Err(EngineError::MissingMetadata(path.display().to_string()));
        }
        schema.header = true;
        Ok(schema)
    }

    fn has_header(&self, schema: &Schema) -> bool {
        schema.header
    }

    fn decode(&self, line: &str, schema: &Arc<Schema>) -> Result<Row, EngineError> {
        let fields = self.split(line);
        let mut row = Row::new(Arc::clone(schema));
        for (i, column) in schema.columns.iter().enumerate() {
            let raw = fields.get(i).map_or("", String::as_str);
            if raw.is_empty() && column.data_type != DataType::Text {
                continue; // stays NULL
            }
            row.set(i, Value::coerce(raw, column.data_type)?)?;
        }
        Ok(row)
    }

    fn encode(&self, row: &Row) -> Result<String, EngineError> {
        let fields: Vec<String> = (0..row.len())
            .map(|i| {
                let v = row.display_value(i);
                if v == "NULL" {
                    String::new()
                } else {
                    self.quote(&v)
                }
            })
            .collect();
        Ok(fields.join(&self.delimiter.to_string()))
    }

    fn header_line(&self, schema: &Schema) -> Option<String> {
        if !schema.header {
            return None;
        }
        Some(
            schema
                .columns
                .iter()
                .map(|c| c.name.clone())
                .collect::<Vec<_>>()
                .join(&self.delimiter.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_with_quotes() {
        let c = TextCodec::new(',');
        assert_eq!(c.split("a,\"b,c\",d"), vec!["a", "b,c", "d"]);
        assert_eq!(c.split("a,\"he said \"\"hi\"\"\""), vec!["a", "he said \"hi\""]);
    }

    #[test]
    fn test_decode_typed() {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("name", DataType::Text);
        let schema = Arc::new(s);
        let c = TextCodec::new('\t');
        let row = c.decode("7\talice", &schema).unwrap();
        assert_eq!(row.get(0).unwrap(), &Value::Integer(7));
        assert_eq!(row.get(1).unwrap(), &Value::Text("alice".into()));
    }

    #[test]
    fn test_encode_roundtrip() {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("name", DataType::Text);
        let schema = Arc::new(s);
        let c = TextCodec::new(',');
        let row = Row::from_values(
            Arc::clone(&schema),
            vec![Value::Integer(1), Value::Text("a,b".into())],
        )
        .unwrap();
        let line = c.encode(&row).unwrap();
        assert_eq!(line, "1,\"a,b\"");
        let back = c.decode(&line, &schema).unwrap();
        assert_eq!(back.get(1).unwrap(), &Value::Text("a,b".into()));
    }
}
