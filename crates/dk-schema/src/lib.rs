//! Entity schema, shorthand parsing, type inference, and coercion
//! (component D).
//!
//! Grounded on `original_source/dkit/parsers/type_parser.py`: a shorthand
//! `Type(key=value, ...)` scanner is ported as a hand-written tokenizer
//! (the original uses a small regex-per-option scan-and-dispatch loop with
//! a `process_remainder` catch-all; here that becomes an explicit
//! character scan with the same "unknown trailing text is a hard error"
//! behavior) rather than pulling in a parser-combinator crate, matching
//! `estuary-flow`'s own preference for hand-rolled parsing in `parser`.

pub mod coerce;
pub mod infer;
pub mod shorthand;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unrecognized type name '{0}'")]
    UnknownType(String),
    #[error("unrecognized shorthand option '{0}'")]
    UnknownOption(String),
    #[error("invalid value for option '{option}': {value}")]
    InvalidOptionValue { option: String, value: String },
    #[error("unexpected trailing text after shorthand arguments: '{0}'")]
    TrailingText(String),
    #[error("malformed shorthand descriptor: '{0}'")]
    Malformed(String),
    #[error("entity has more than one field marked primary_key without a declared composite key")]
    AmbiguousPrimaryKey,
    #[error("composite key column '{0}' is not a field of this entity")]
    UnknownKeyColumn(String),
    #[error("field '{field}' requires str_len to generate DDL")]
    MissingStrLen { field: String },
    #[error("coercion failed for non-nullable field '{field}': {reason}")]
    CoercionFailed { field: String, reason: String },
}

/// The scalar type domain a field may declare (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Binary,
    Boolean,
    Date,
    DateTime,
    Decimal,
    Double,
    Float,
    Int8,
    Int16,
    Int32,
    Int64,
    Integer,
    String,
    Time,
}

impl FieldType {
    pub const ALL: &'static [FieldType] = &[
        FieldType::Binary,
        FieldType::Boolean,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Decimal,
        FieldType::Double,
        FieldType::Float,
        FieldType::Int8,
        FieldType::Int16,
        FieldType::Int32,
        FieldType::Int64,
        FieldType::Integer,
        FieldType::String,
        FieldType::Time,
    ]
    ;

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Binary => "Binary",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::DateTime => "DateTime",
            FieldType::Decimal => "Decimal",
            FieldType::Double => "Double",
            FieldType::Float => "Float",
            FieldType::Int8 => "Int8",
            FieldType::Int16 => "Int16",
            FieldType::Int32 => "Int32",
            FieldType::Int64 => "Int64",
            FieldType::Integer => "Integer",
            FieldType::String => "String",
            FieldType::Time => "Time",
        }
    }

    pub fn from_name(name: &str) -> Option<FieldType> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Fixed bit width for sized numeric variants (`spec.md` §3: "numeric
    /// sized variants map to a fixed width"). `None` for unsized types.
    pub fn fixed_width_bits(self) -> Option<u32> {
        match self {
            FieldType::Int8 => Some(8),
            FieldType::Int16 => Some(16),
            FieldType::Int32 => Some(32),
            FieldType::Int64 | FieldType::Integer => Some(64),
            FieldType::Float => Some(32),
            FieldType::Double => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A field-type descriptor (`spec.md` §3 Entity:
/// `{type, str_len?, primary_key?, index?, unique?, nullable?, precision?, scale?}`,
/// plus the shorthand-only `autoincrement`/`info` options).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub field_type: FieldType,
    pub str_len: Option<u32>,
    pub primary_key: bool,
    pub unique: bool,
    pub index: bool,
    pub nullable: bool,
    pub autoincrement: bool,
    pub info: Option<String>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl FieldDescriptor {
    pub fn new(field_type: FieldType) -> Self {
        FieldDescriptor {
            field_type,
            str_len: None,
            primary_key: false,
            unique: false,
            index: false,
            nullable: false,
            autoincrement: false,
            info: None,
            precision: None,
            scale: None,
        }
    }
}

/// A named schema: an ordered mapping from field name to descriptor, plus
/// an optional declared composite primary key (`spec.md` §3 Entity
/// invariant: "at most one field may be marked primary_key per entity
/// unless a composite key is declared as an ordered list").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entity {
    pub fields: IndexMap<String, FieldDescriptor>,
    pub composite_key: Option<Vec<String>>,
}

impl Entity {
    pub fn new() -> Self {
        Entity::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), descriptor);
        self
    }

    /// Validates the primary-key invariant and (if `require_str_len`) that
    /// every `String` field declares `str_len` (`spec.md` §3: "`str_len` is
    /// required for `string` when the entity drives DDL generation").
    pub fn validate(&self, require_str_len_for_ddl: bool) -> Result<(), SchemaError> {
        if let Some(cols) = &self.composite_key {
            for col in cols {
                if !self.fields.contains_key(col) {
                    return Err(SchemaError::UnknownKeyColumn(col.clone()));
                }
            }
        } else {
            let single_pk_count = self.fields.values().filter(|d| d.primary_key).count();
            if single_pk_count > 1 {
                return Err(SchemaError::AmbiguousPrimaryKey);
            }
        }

        if require_str_len_for_ddl {
            for (name, desc) in &self.fields {
                if desc.field_type == FieldType::String && desc.str_len.is_none() {
                    return Err(SchemaError::MissingStrLen { field: name.clone() });
                }
            }
        }

        Ok(())
    }

    pub fn primary_key_columns(&self) -> Vec<String> {
        if let Some(cols) = &self.composite_key {
            return cols.clone();
        }
        self.fields
            .iter()
            .filter(|(_, d)| d.primary_key)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ambiguous_primary_key() {
        let entity = Entity::new()
            .with_field("a", {
                let mut d = FieldDescriptor::new(FieldType::Integer);
                d.primary_key = true;
                d
            })
            .with_field("b", {
                let mut d = FieldDescriptor::new(FieldType::Integer);
                d.primary_key = true;
                d
            });
        assert!(matches!(
            entity.validate(false),
            Err(SchemaError::AmbiguousPrimaryKey)
        ));
    }

    #[test]
    fn composite_key_bypasses_ambiguity_check() {
        let entity = Entity::new()
            .with_field("a", FieldDescriptor::new(FieldType::Integer))
            .with_field("b", FieldDescriptor::new(FieldType::Integer));
        let mut entity = entity;
        entity.composite_key = Some(vec!["a".to_string(), "b".to_string()]);
        assert!(entity.validate(false).is_ok());
    }

    #[test]
    fn missing_str_len_fails_ddl_validation() {
        let entity = Entity::new().with_field("name", FieldDescriptor::new(FieldType::String));
        assert!(matches!(
            entity.validate(true),
            Err(SchemaError::MissingStrLen { .. })
        ));
        assert!(entity.validate(false).is_ok());
    }
}
