//! The record data model (`spec.md` §3).
//!
//! Per the Design Notes' "Dynamic record dictionaries" re-architecture: a
//! [`Record`] is an ordered field-name index (`indexmap::IndexMap`) of
//! [`Value`], a tagged union over the value domain `spec.md` §3 defines.
//! Sized numeric variants (`Int8`/`Int16`/...) are a schema (component D)
//! concern, not a stream-level one: at the stream level every integer is
//! `Value::Int`/`Value::UInt`, and width/range are enforced during coercion.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single record field value, drawn from the scalar domain in `spec.md` §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Time(_) => "time",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Decimal(d) => d.to_string().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{d}"),
            Value::DateTime(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::UInt(u) => serde_json::Value::from(u),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::String(s) => serde_json::Value::String(s),
            Value::Binary(b) => serde_json::Value::String(hex_encode(&b)),
            Value::Date(d) => serde_json::Value::String(d.to_string()),
            Value::DateTime(d) => serde_json::Value::String(d.to_rfc3339()),
            Value::Time(t) => serde_json::Value::String(t.to_string()),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// An ordered mapping of field name to [`Value`] (`spec.md` §3 Record).
/// Fields may be absent across records in the same stream; absence is not
/// the same as `Value::Null`.
pub type Record = IndexMap<String, Value>;

/// Build a [`Record`] from a JSON object, preserving key order. Non-object
/// top-level values are rejected by the caller (codecs only ever hand this
/// function an object).
pub fn record_from_json_object(obj: serde_json::Map<String, serde_json::Value>) -> Record {
    obj.into_iter().map(|(k, v)| (k, Value::from(&v))).collect()
}

pub fn record_to_json_object(record: &Record) -> serde_json::Map<String, serde_json::Value> {
    record
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
        .collect()
}

/// Project a record onto exactly the given field names, in that order.
/// Returns the name of the first missing field as `Err` (`spec.md` §4.3
/// `MissingFieldError` contract).
pub fn project<'a>(record: &'a Record, field_names: &[String]) -> Result<Record, &'a str> {
    let mut out = Record::with_capacity(field_names.len());
    for name in field_names {
        match record.get(name) {
            Some(v) => {
                out.insert(name.clone(), v.clone());
            }
            None => return Err(name.as_str()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_preserves_order() {
        let obj = serde_json::json!({"b": 1, "a": "x"});
        let serde_json::Value::Object(map) = obj else {
            unreachable!()
        };
        let rec = record_from_json_object(map);
        let keys: Vec<_> = rec.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn project_reports_missing_field() {
        let mut rec = Record::new();
        rec.insert("a".into(), Value::Int(1));
        let err = project(&rec, &["a".to_string(), "b".to_string()]).unwrap_err();
        assert_eq!(err, "b");
    }
}
