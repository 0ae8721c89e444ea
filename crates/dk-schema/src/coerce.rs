//! Coercion of a record to a declared [`crate::Entity`] (`spec.md` §4.5).
//!
//! Strings are trimmed, numerics parsed at their declared width, decimals
//! rounded to `scale`. A failure on a non-nullable field is fatal; a
//! failure on a nullable field yields `Value::Null`, matching the
//! original's "nullable fields absorb bad data, required fields reject it"
//! behavior.

use dk_record::{Record, Value};

use crate::infer::{parse_date_lenient, parse_datetime_lenient, parse_int_lenient};
use crate::{Entity, FieldDescriptor, FieldType, SchemaError};

pub fn coerce_record(record: &Record, entity: &Entity) -> Result<Record, SchemaError> {
    let mut out = Record::with_capacity(entity.fields.len());
    for (name, descriptor) in &entity.fields {
        let raw = record.get(name).cloned().unwrap_or(Value::Null);
        let coerced = coerce_field(name, &raw, descriptor)?;
        out.insert(name.clone(), coerced);
    }
    Ok(out)
}

fn coerce_field(name: &str, raw: &Value, descriptor: &FieldDescriptor) -> Result<Value, SchemaError> {
    if raw.is_null() {
        if descriptor.nullable {
            return Ok(Value::Null);
        }
        return Err(SchemaError::CoercionFailed {
            field: name.to_string(),
            reason: "field is not nullable but no value was present".to_string(),
        });
    }

    match coerce_value(raw, descriptor) {
        Some(v) => Ok(v),
        None if descriptor.nullable => Ok(Value::Null),
        None => Err(SchemaError::CoercionFailed {
            field: name.to_string(),
            reason: format!(
                "could not coerce value '{raw}' to {}",
                descriptor.field_type
            ),
        }),
    }
}

fn coerce_value(raw: &Value, descriptor: &FieldDescriptor) -> Option<Value> {
    match descriptor.field_type {
        FieldType::String => Some(Value::String(raw.to_string().trim().to_string())),
        FieldType::Binary => match raw {
            Value::Binary(b) => Some(Value::Binary(b.clone())),
            _ => None,
        },
        FieldType::Boolean => coerce_bool(raw),
        FieldType::Int8 => coerce_int(raw).filter(|i| i8::try_from(*i).is_ok()).map(Value::Int),
        FieldType::Int16 => coerce_int(raw).filter(|i| i16::try_from(*i).is_ok()).map(Value::Int),
        FieldType::Int32 => coerce_int(raw).filter(|i| i32::try_from(*i).is_ok()).map(Value::Int),
        FieldType::Int64 | FieldType::Integer => coerce_int(raw).map(Value::Int),
        FieldType::Float | FieldType::Double => coerce_float(raw),
        FieldType::Decimal => coerce_decimal(raw, descriptor.scale),
        FieldType::Date => coerce_date(raw),
        FieldType::DateTime => coerce_datetime(raw),
        FieldType::Time => coerce_time(raw),
    }
}

fn coerce_bool(raw: &Value) -> Option<Value> {
    match raw {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(Value::Bool(true)),
            "false" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_int(raw: &Value) -> Option<i64> {
    match raw {
        Value::Int(i) => Some(*i),
        Value::UInt(u) => i64::try_from(*u).ok(),
        Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        Value::String(s) => parse_int_lenient(s.trim()),
        _ => None,
    }
}

fn coerce_float(raw: &Value) -> Option<Value> {
    let f = match raw {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    Some(Value::Float(f))
}

fn coerce_decimal(raw: &Value, scale: Option<u32>) -> Option<Value> {
    let decimal = match raw {
        Value::Decimal(d) => Some(*d),
        Value::Int(i) => Some(rust_decimal::Decimal::from(*i)),
        Value::String(s) => s.trim().parse::<rust_decimal::Decimal>().ok(),
        _ => None,
    }?;
    let rounded = match scale {
        Some(s) => decimal.round_dp(s),
        None => decimal,
    };
    Some(Value::Decimal(rounded))
}

fn coerce_date(raw: &Value) -> Option<Value> {
    match raw {
        Value::Date(d) => Some(Value::Date(*d)),
        Value::String(s) => parse_date_lenient(s.trim()).map(Value::Date),
        _ => None,
    }
}

fn coerce_datetime(raw: &Value) -> Option<Value> {
    match raw {
        Value::DateTime(d) => Some(Value::DateTime(*d)),
        Value::String(s) => parse_datetime_lenient(s.trim()).map(Value::DateTime),
        _ => None,
    }
}

fn coerce_time(raw: &Value) -> Option<Value> {
    match raw {
        Value::Time(t) => Some(Value::Time(*t)),
        Value::String(s) => {
            const FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];
            FORMATS
                .iter()
                .find_map(|fmt| chrono::NaiveTime::parse_from_str(s.trim(), fmt).ok())
                .map(Value::Time)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_trimmed_string_and_parsed_int() {
        let entity = Entity::new()
            .with_field("name", {
                let mut d = FieldDescriptor::new(FieldType::String);
                d.nullable = false;
                d
            })
            .with_field("age", {
                let mut d = FieldDescriptor::new(FieldType::Integer);
                d.nullable = false;
                d
            });

        let mut record = Record::new();
        record.insert("name".into(), Value::String("  alice  ".into()));
        record.insert("age".into(), Value::String("30".into()));

        let coerced = coerce_record(&record, &entity).unwrap();
        assert_eq!(coerced["name"], Value::String("alice".into()));
        assert_eq!(coerced["age"], Value::Int(30));
    }

    #[test]
    fn non_nullable_coercion_failure_is_fatal() {
        let entity = Entity::new().with_field("age", {
            let mut d = FieldDescriptor::new(FieldType::Integer);
            d.nullable = false;
            d
        });
        let mut record = Record::new();
        record.insert("age".into(), Value::String("not a number".into()));
        assert!(coerce_record(&record, &entity).is_err());
    }

    #[test]
    fn nullable_coercion_failure_yields_null() {
        let mut descriptor = FieldDescriptor::new(FieldType::Integer);
        descriptor.nullable = true;
        let entity = Entity::new().with_field("age", descriptor);
        let mut record = Record::new();
        record.insert("age".into(), Value::String("not a number".into()));
        let coerced = coerce_record(&record, &entity).unwrap();
        assert_eq!(coerced["age"], Value::Null);
    }

    #[test]
    fn bare_field_defaults_to_non_nullable_and_rejects_bad_values() {
        // a bare `Integer()` is non-nullable by default (spec.md:278
        // acceptance scenario 2): a bad value must raise, not go Null.
        let entity = Entity::new().with_field("age", FieldDescriptor::new(FieldType::Integer));
        let mut record = Record::new();
        record.insert("age".into(), Value::String("x".into()));
        let err = coerce_record(&record, &entity);
        assert!(matches!(err, Err(SchemaError::CoercionFailed { .. })));
    }

    #[test]
    fn decimal_is_rounded_to_scale() {
        let entity = Entity::new().with_field("price", {
            let mut d = FieldDescriptor::new(FieldType::Decimal);
            d.scale = Some(2);
            d
        });
        let mut record = Record::new();
        record.insert("price".into(), Value::String("19.999".into()));
        let coerced = coerce_record(&record, &entity).unwrap();
        assert_eq!(
            coerced["price"],
            Value::Decimal(rust_decimal::Decimal::new(2000, 2))
        );
    }
}
