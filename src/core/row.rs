use std::sync::Arc;

use super::error::EngineError;
use super::schema::Schema;
use super::value::Value;

/// A fixed-schema row. The schema handle is shared, not copied per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Row {
    /// New row with every column NULL.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![Value::Null; schema.columns.len()];
        Self { schema, values }
    }

    pub fn from_values(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self, EngineError> {
        if values.len() != schema.columns.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "row has {} values, schema '{}' has {} columns",
                values.len(),
                schema.name,
                schema.columns.len()
            )));
        }
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Value, EngineError> {
        self.values
            .get(index)
            .ok_or_else(|| EngineError::Execution(format!("column index {index} out of range")))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Set a column. A `Text` value against a non-text column is coerced,
    /// which is how INSERT literals arrive from the statement parser.
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), EngineError> {
        let column = self
            .schema
            .columns
            .get(index)
            .ok_or_else(|| EngineError::Execution(format!("column index {index} out of range")))?;
        let coerced = match (&value, column.data_type) {
            (Value::Null, _) => Value::Null,
            (Value::Text(s), dt) if dt != super::value::DataType::Text => {
                Value::coerce(s, dt)?
            }
            (v, super::value::DataType::Text) if !matches!(v, Value::Text(_)) => {
                Value::Text(v.to_string())
            }
            _ => value,
        };
        self.values[index] = coerced;
        Ok(())
    }

    pub fn set_string(&mut self, index: usize, raw: &str) -> Result<(), EngineError> {
        self.set(index, Value::Text(raw.to_string()))
    }

    /// Copy values from another row (same column count), used by the
    /// streaming decode path to fill a caller-owned buffer.
    pub fn copy_from(&mut self, other: &Self) -> Result<(), EngineError> {
        if other.values.len() != self.values.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "cannot copy {} values into {}-column row",
                other.values.len(),
                self.values.len()
            )));
        }
        self.values.clone_from_slice(&other.values);
        Ok(())
    }

    pub fn replace_values(&mut self, values: Vec<Value>) -> Result<(), EngineError> {
        if values.len() != self.values.len() {
            return Err(EngineError::SchemaMismatch(format!(
                "cannot place {} values into {}-column row",
                values.len(),
                self.values.len()
            )));
        }
        self.values = values;
        Ok(())
    }

    pub fn display_value(&self, index: usize) -> String {
        self.values
            .get(index)
            .map_or_else(String::new, ToString::to_string)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::DataType;

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("name", DataType::Text);
        Arc::new(s)
    }

    #[test]
    fn test_set_coerces_text_literal() {
        let mut r = Row::new(schema());
        r.set_string(0, "7").unwrap();
        r.set_string(1, "alice").unwrap();
        assert_eq!(r.get(0).unwrap(), &Value::Integer(7));
        assert_eq!(r.get(1).unwrap(), &Value::Text("alice".into()));
    }

    #[test]
    fn test_out_of_range() {
        let mut r = Row::new(schema());
        assert!(r.set(5, Value::Integer(1)).is_err());
        assert!(r.get(5).is_err());
    }
}
