use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// Declared type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Real,
    Decimal,
    Text,
    Boolean,
    Date,
    Timestamp,
    Bytes,
}

impl DataType {
    /// Parse a DDL type token: `INT`, `BIGINT`, `DOUBLE`, `VARCHAR(64)`, ...
    /// Size/precision suffixes are accepted and ignored for storage purposes.
    pub fn parse(token: &str) -> Result<Self, EngineError> {
        let base = token
            .split('(')
            .next()
            .unwrap_or(token)
            .trim()
            .to_ascii_uppercase();
        match base.as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "INT8" | "INT32" | "INT64" | "UINT32" => {
                Ok(Self::Integer)
            }
            "REAL" | "FLOAT" | "DOUBLE" => Ok(Self::Real),
            "DECIMAL" | "NUMERIC" => Ok(Self::Decimal),
            "TEXT" | "STRING" | "VARCHAR" | "CHAR" => Ok(Self::Text),
            "BOOL" | "BOOLEAN" => Ok(Self::Boolean),
            "DATE" => Ok(Self::Date),
            "TIMESTAMP" | "DATETIME" => Ok(Self::Timestamp),
            "BYTES" | "BLOB" | "BYTEA" => Ok(Self::Bytes),
            _ => Err(EngineError::Parse(format!("unknown column type: {token}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Text => "STRING",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Bytes => "BYTES",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Decimal(Decimal),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used by SUM/AVG and cross-type comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            Self::Decimal(d) => d.to_f64(),
            Self::Boolean(b) => Some(i64::from(*b) as f64),
            _ => None,
        }
    }

    /// Natural ordering of two values, comparing numerics across
    /// representations. `None` when the kinds are not comparable.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Some(a.cmp(b)),
            (Self::Decimal(a), Self::Decimal(b)) => Some(a.cmp(b)),
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// Interpret a raw SQL literal, quotes preserved by the parser. A quoted
    /// literal that fails coercion to a non-text column stays text (and then
    /// never compares equal); an unquoted literal must coerce.
    pub fn from_literal(raw: &str, target: DataType) -> Result<Self, EngineError> {
        let raw = raw.trim();
        let quoted = raw.len() >= 2
            && ((raw.starts_with('\'') && raw.ends_with('\''))
                || (raw.starts_with('"') && raw.ends_with('"')));
        if quoted {
            let inner = &raw[1..raw.len() - 1];
            return Ok(Self::coerce(inner, target)
                .unwrap_or_else(|_| Self::Text(inner.to_string())));
        }
        Self::coerce(raw, target)
    }

    /// Coerce a raw literal into a value of the given column type.
    pub fn coerce(raw: &str, target: DataType) -> Result<Self, EngineError> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("NULL") {
            return Ok(Self::Null);
        }
        let bad = || EngineError::InvalidValueFormat(format!("'{raw}' for {}", target.name()));
        match target {
            DataType::Integer => {
                // Accept float-shaped text for integer columns, truncating.
                raw.parse::<i64>()
                    .map(Self::Integer)
                    .or_else(|_| raw.parse::<f64>().map(|d| Self::Integer(d as i64)))
                    .map_err(|_| bad())
            }
            DataType::Real => raw.parse::<f64>().map(Self::Real).map_err(|_| bad()),
            DataType::Decimal => Decimal::from_str(raw).map(Self::Decimal).map_err(|_| bad()),
            DataType::Text => Ok(Self::Text(raw.to_string())),
            DataType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Self::Boolean(true)),
                "false" | "f" | "0" => Ok(Self::Boolean(false)),
                _ => Err(bad()),
            },
            DataType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|_| bad()),
            DataType::Timestamp => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(Self::Timestamp)
                .map_err(|_| bad()),
            DataType::Bytes => {
                let h = raw.strip_prefix("\\x").unwrap_or(raw);
                hex::decode(h).map(Self::Bytes).map_err(|_| bad())
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            Self::Bytes(b) => write!(f, "\\x{}", hex::encode(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_integer() {
        assert_eq!(Value::coerce("42", DataType::Integer).unwrap(), Value::Integer(42));
        assert_eq!(Value::coerce("42.9", DataType::Integer).unwrap(), Value::Integer(42));
        assert_eq!(Value::coerce("NULL", DataType::Integer).unwrap(), Value::Null);
        assert!(Value::coerce("abc", DataType::Integer).is_err());
    }

    #[test]
    fn test_compare_cross_numeric() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Real(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Real(3.0).compare(&Value::Integer(3)),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Null.compare(&Value::Integer(3)), None);
        assert_eq!(Value::Null.compare(&Value::Null), Some(Ordering::Equal));
    }

    #[test]
    fn test_type_parse() {
        assert_eq!(DataType::parse("VARCHAR(64)").unwrap(), DataType::Text);
        assert_eq!(DataType::parse("bigint").unwrap(), DataType::Integer);
        assert!(DataType::parse("GEOMETRY").is_err());
    }
}
