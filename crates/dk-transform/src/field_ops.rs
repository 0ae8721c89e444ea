//! `iter_rename` / `iter_drop` / `iter_add_id` (`spec.md` §4.7):
//! field-shape operations that stay lazy over the input iterator.

use dk_record::{Record, Value};
use uuid::Uuid;

pub fn iter_rename<I>(records: I, renames: Vec<(String, String)>) -> impl Iterator<Item = Record>
where
    I: Iterator<Item = Record>,
{
    records.map(move |record| {
        let mut out = Record::with_capacity(record.len());
        for (name, value) in record {
            let renamed = renames
                .iter()
                .find(|(from, _)| *from == name)
                .map(|(_, to)| to.clone())
                .unwrap_or(name);
            out.insert(renamed, value);
        }
        out
    })
}

pub fn iter_drop<I>(records: I, fields: Vec<String>) -> impl Iterator<Item = Record>
where
    I: Iterator<Item = Record>,
{
    records.map(move |mut record| {
        for field in &fields {
            record.shift_remove(field);
        }
        record
    })
}

pub fn iter_add_id<I>(records: I, field_name: impl Into<String>) -> impl Iterator<Item = Record>
where
    I: Iterator<Item = Record>,
{
    let field_name = field_name.into();
    records.map(move |mut record| {
        record.insert(field_name.clone(), Value::String(Uuid::new_v4().to_string()));
        record
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec() -> Record {
        let mut r = Record::new();
        r.insert("a".into(), Value::Int(1));
        r.insert("b".into(), Value::Int(2));
        r
    }

    #[test]
    fn renames_only_the_named_fields() {
        let out: Vec<_> = iter_rename(vec![rec()].into_iter(), vec![("a".into(), "x".into())]).collect();
        assert!(out[0].contains_key("x"));
        assert!(out[0].contains_key("b"));
        assert!(!out[0].contains_key("a"));
    }

    #[test]
    fn drops_the_named_fields() {
        let out: Vec<_> = iter_drop(vec![rec()].into_iter(), vec!["a".into()]).collect();
        assert!(!out[0].contains_key("a"));
        assert!(out[0].contains_key("b"));
    }

    #[test]
    fn add_id_injects_a_unique_uuid_string() {
        let out: Vec<_> = iter_add_id(vec![rec(), rec()].into_iter(), "uuid").collect();
        let a = out[0]["uuid"].as_str().unwrap();
        let b = out[1]["uuid"].as_str().unwrap();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a).is_ok());
    }
}
