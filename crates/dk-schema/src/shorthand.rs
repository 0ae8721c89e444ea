//! The `Type(key=value, ...)` shorthand scanner.
//!
//! Ported from `original_source/dkit/parsers/type_parser.py`: match the
//! type name, then scan comma-separated `key=value` pairs left to right.
//! Anything left over once every recognized option has been consumed is a
//! hard parse error (`process_remainder` in the original).

use crate::{FieldDescriptor, FieldType, SchemaError};

pub fn parse(text: &str) -> Result<FieldDescriptor, SchemaError> {
    let text = text.trim();

    let paren_pos = text.find('(');
    let (type_name, args) = match paren_pos {
        None => (text, None),
        Some(pos) => {
            if !text.ends_with(')') {
                return Err(SchemaError::Malformed(text.to_string()));
            }
            (text[..pos].trim(), Some(&text[pos + 1..text.len() - 1]))
        }
    };

    let field_type = FieldType::from_name(type_name)
        .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))?;
    let mut descriptor = FieldDescriptor::new(field_type);

    let Some(args) = args else {
        return Ok(descriptor);
    };
    let args = args.trim();
    if args.is_empty() {
        return Ok(descriptor);
    }

    for part in split_top_level(args) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, value)) = part.split_once('=') else {
            return Err(SchemaError::Malformed(part.to_string()));
        };
        let key = key.trim();
        let value = value.trim();
        apply_option(&mut descriptor, key, value)?;
    }

    Ok(descriptor)
}

fn split_top_level(args: &str) -> Vec<&str> {
    args.split(',').collect()
}

fn apply_option(descriptor: &mut FieldDescriptor, key: &str, value: &str) -> Result<(), SchemaError> {
    match key {
        "str_len" => descriptor.str_len = Some(parse_int(key, value)?),
        "primary_key" => descriptor.primary_key = parse_bool(key, value)?,
        "unique" => descriptor.unique = parse_bool(key, value)?,
        "index" => descriptor.index = parse_bool(key, value)?,
        "nullable" => descriptor.nullable = parse_bool(key, value)?,
        "autoincrement" => descriptor.autoincrement = parse_bool(key, value)?,
        "info" => descriptor.info = Some(value.to_string()),
        "precision" => descriptor.precision = Some(parse_int(key, value)?),
        "scale" => descriptor.scale = Some(parse_int(key, value)?),
        other => return Err(SchemaError::UnknownOption(other.to_string())),
    }
    Ok(())
}

fn parse_bool(option: &str, value: &str) -> Result<bool, SchemaError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(SchemaError::InvalidOptionValue {
            option: option.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_int(option: &str, value: &str) -> Result<u32, SchemaError> {
    value.parse().map_err(|_| SchemaError::InvalidOptionValue {
        option: option.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_type() {
        let d = parse("Integer").unwrap();
        assert_eq!(d.field_type, FieldType::Integer);
        assert!(d.str_len.is_none());
    }

    #[test]
    fn parses_options() {
        let d = parse("String(str_len=64, primary_key=true, nullable=false)").unwrap();
        assert_eq!(d.field_type, FieldType::String);
        assert_eq!(d.str_len, Some(64));
        assert!(d.primary_key);
        assert!(!d.nullable);
    }

    #[test]
    fn rejects_unknown_option() {
        let err = parse("Integer(bogus=1)").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownOption(o) if o == "bogus"));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(matches!(parse("Nope"), Err(SchemaError::UnknownType(_))));
    }

    #[test]
    fn rejects_unbalanced_parens() {
        assert!(matches!(parse("Integer(str_len=1"), Err(SchemaError::Malformed(_))));
    }
}
