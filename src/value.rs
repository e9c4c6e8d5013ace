//! A small tagged value type for the JSON-like trees the vault stores and
//! walks (`PathOps`, `MetadataExtractor`, `QueryEngine` type inference). We
//! keep our own enum rather than working directly in `serde_json::Value` so
//! that column/key order is explicit (`IndexMap`, not the default HashMap
//! ordering serde_json falls back to without its `preserve_order` feature)
//! and so type inference and date detection are plain pattern matches.

use chrono::{DateTime, NaiveDate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

/// Column type tags, matching spec §3's `schema` type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    Null,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Object => "object",
            ColumnType::Array => "array",
            ColumnType::Null => "null",
        };
        f.write_str(s)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The base type tag, ignoring the secondary date tag (computed lazily
    /// by `is_date_like`, per Design Notes §9).
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::Null,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(_) => ColumnType::Number,
            Value::String(s) => {
                if is_date_like(s) {
                    ColumnType::Date
                } else {
                    ColumnType::String
                }
            }
            Value::List(_) => ColumnType::Array,
            Value::Map(_) => ColumnType::Object,
        }
    }

    /// Stringified form used for `topValues` keys and dedup cardinality
    /// (JSON-serialized, per Design Notes §9 — stable but opaque for
    /// object-valued columns).
    pub fn stringify(&self) -> String {
        serde_json::to_string(&serde_json::Value::from(self.clone()))
            .unwrap_or_else(|_| "null".to_string())
    }
}

/// ISO-8601 date or date-time detection (ties into `date` typing in §3).
pub fn is_date_like(s: &str) -> bool {
    if s.len() < 8 {
        return false;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_detection() {
        assert!(is_date_like("2024-01-15"));
        assert!(is_date_like("2024-01-15T10:30:00Z"));
        assert!(!is_date_like("hello"));
        assert!(!is_date_like("123"));
    }

    #[test]
    fn roundtrip_through_json() {
        let original = serde_json::json!({"a": 1, "b": [1,2,3], "c": null, "d": "x"});
        let v: Value = original.clone().into();
        let back: serde_json::Value = v.into();
        assert_eq!(original, back);
    }

    #[test]
    fn column_type_inference() {
        assert_eq!(Value::Number(1.0).column_type(), ColumnType::Number);
        assert_eq!(Value::Bool(true).column_type(), ColumnType::Boolean);
        assert_eq!(Value::Null.column_type(), ColumnType::Null);
        assert_eq!(
            Value::String("2024-01-01".into()).column_type(),
            ColumnType::Date
        );
        assert_eq!(Value::String("abc".into()).column_type(), ColumnType::String);
    }
}
