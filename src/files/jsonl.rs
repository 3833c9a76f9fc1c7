//! JSON-lines codec: one object per line.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::core::{DataType, EngineError, Row, Schema, Value};

use super::RecordCodec;

pub struct JsonlCodec;

fn json_to_value(json: &Json, target: DataType) -> Result<Value, EngineError> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Boolean(*b)),
        Json::Number(n) => match target {
            DataType::Integer => Ok(Value::Integer(
                n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
            )),
            DataType::Real => Ok(Value::Real(n.as_f64().unwrap_or(0.0))),
            _ => Value::coerce(&n.to_string(), target),
        },
        Json::String(s) => Value::coerce(s, target).or_else(|_| Ok(Value::Text(s.clone()))),
        other => Ok(Value::Text(other.to_string())),
    }
}

fn value_to_json(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Integer(i) => Json::from(*i),
        Value::Real(r) => serde_json::Number::from_f64(*r).map_or(Json::Null, Json::Number),
        Value::Boolean(b) => Json::from(*b),
        other => Json::from(other.to_string()),
    }
}

impl RecordCodec for JsonlCodec {
    fn derive_schema(&self, path: &Path, sample: &str) -> Result<Schema, EngineError> {
        let parsed: Json = serde_json::from_str(sample)
            .map_err(|e| EngineError::RowCodec(format!("malformed JSONL record: {e}")))?;
        let Json::Object(map) = parsed else {
            return Err(EngineError::RowCodec(
                "JSONL records must be objects".into(),
            ));
        };
        let name = path
            .file_stem()
            .map_or_else(|| "file".to_string(), |s| s.to_string_lossy().into_owned());
        let mut schema = Schema::new(&name);
        for (key, value) in &map {
            let dt = match value {
                Json::Number(n) if n.is_i64() || n.is_u64() => DataType::Integer,
                Json::Number(_) => DataType::Real,
                Json::Bool(_) => DataType::Boolean,
                _ => DataType::Text,
            };
            schema.add_column(key, dt);
        }
        schema.header = false;
        Ok(schema)
    }

    fn has_header(&self, _schema: &Schema) -> bool {
        false
    }

    fn decode(&self, line: &str, schema: &Arc<Schema>) -> Result<Row, EngineError> {
        let parsed: Json = serde_json::from_str(line)
            .map_err(|e| EngineError::RowCodec(format!("malformed JSONL record: {e}")))?;
        let Json::Object(map) = parsed else {
            return Err(EngineError::RowCodec(
                "JSONL records must be objects".into(),
            ));
        };
        let mut row = Row::new(Arc::clone(schema));
        for (i, column) in schema.columns.iter().enumerate() {
            if let Some(json) = map.get(&column.name) {
                row.set(i, json_to_value(json, column.data_type)?)?;
            }
        }
        Ok(row)
    }

    fn encode(&self, row: &Row) -> Result<String, EngineError> {
        let mut map = serde_json::Map::new();
        for (i, column) in row.schema().columns.iter().enumerate() {
            map.insert(column.name.clone(), value_to_json(row.get(i)?));
        }
        Ok(Json::Object(map).to_string())
    }

    fn header_line(&self, _schema: &Schema) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_and_decode() {
        let path = Path::new("orders.jsonl");
        let codec = JsonlCodec;
        let schema = codec
            .derive_schema(path, r#"{"id": 1, "name": "a", "price": 1.5}"#)
            .unwrap();
        assert_eq!(schema.columns.len(), 3);
        assert!(!schema.header);

        let schema = Arc::new(schema);
        let row = codec
            .decode(r#"{"id": 2, "name": "b", "price": 2.5}"#, &schema)
            .unwrap();
        let id_col = schema.column_at("id").unwrap();
        assert_eq!(row.get(id_col).unwrap(), &Value::Integer(2));
    }

    #[test]
    fn test_missing_key_is_null() {
        let codec = JsonlCodec;
        let schema = Arc::new(
            codec
                .derive_schema(Path::new("t.jsonl"), r#"{"id": 1, "name": "a"}"#)
                .unwrap(),
        );
        let row = codec.decode(r#"{"id": 3}"#, &schema).unwrap();
        let name_col = schema.column_at("name").unwrap();
        assert!(row.get(name_col).unwrap().is_null());
    }

    #[test]
    fn test_encode() {
        let codec = JsonlCodec;
        let schema = Arc::new(
            codec
                .derive_schema(Path::new("t.jsonl"), r#"{"id": 1, "name": "a"}"#)
                .unwrap(),
        );
        let mut row = Row::new(Arc::clone(&schema));
        row.set(schema.column_at("id").unwrap(), Value::Integer(9)).unwrap();
        row.set(schema.column_at("name").unwrap(), Value::Text("z".into()))
            .unwrap();
        let line = codec.encode(&row).unwrap();
        let back: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(back["id"], 9);
        assert_eq!(back["name"], "z");
    }
}
