//! `Merge` (`spec.md` §4.7): inner/left/full join. The right-hand side is
//! fully indexed before the left side is streamed, matching the spec's
//! "right-hand side is fully indexed first"; the left side itself stays
//! lazy.

use dk_record::{Record, Value};
use indexmap::{IndexMap, IndexSet};

use crate::composite_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Full,
}

pub struct Merge {
    left_keys: Vec<String>,
    right_keys: Vec<String>,
    kind: JoinKind,
    null_value: Value,
}

impl Merge {
    pub fn new(left_keys: Vec<String>, right_keys: Vec<String>, kind: JoinKind) -> Self {
        Merge {
            left_keys,
            right_keys,
            kind,
            null_value: Value::Null,
        }
    }

    /// Overrides the fill value used for the side that has no match
    /// (`spec.md` §4.7: "Null fill value is configurable").
    pub fn null_value(mut self, value: Value) -> Self {
        self.null_value = value;
        self
    }

    /// Performs the join. Preserves left-side order for inner and left
    /// joins, as required by `spec.md` §4.7's ordering contract; full
    /// joins append unmatched right-side records after all left-side
    /// output.
    pub fn join<L, R>(&self, left: L, right: R) -> Vec<Record>
    where
        L: Iterator<Item = Record>,
        R: Iterator<Item = Record>,
    {
        let mut right_index: IndexMap<Vec<String>, Vec<Record>> = IndexMap::new();
        let mut right_fields: IndexSet<String> = IndexSet::new();
        for record in right {
            right_fields.extend(record.keys().cloned());
            let key = composite_key(&record, &self.right_keys);
            right_index.entry(key).or_default().push(record);
        }

        let mut matched: IndexSet<Vec<String>> = IndexSet::new();
        let mut left_fields: IndexSet<String> = IndexSet::new();
        let mut output = Vec::new();

        for left_record in left {
            left_fields.extend(left_record.keys().cloned());
            let key = composite_key(&left_record, &self.left_keys);
            if let Some(matches) = right_index.get(&key) {
                matched.insert(key);
                for right_record in matches {
                    output.push(self.combine(&left_record, Some(right_record)));
                }
            } else {
                match self.kind {
                    JoinKind::Inner => {}
                    JoinKind::Left | JoinKind::Full => {
                        output.push(self.combine_with_missing_right(&left_record, &right_fields));
                    }
                }
            }
        }

        if self.kind == JoinKind::Full {
            for (key, records) in &right_index {
                if matched.contains(key) {
                    continue;
                }
                for right_record in records {
                    output.push(self.combine_missing_left(right_record, &left_fields));
                }
            }
        }

        output
    }

    fn combine(&self, left: &Record, right: &Record) -> Record {
        let mut out = left.clone();
        for (k, v) in right {
            insert_with_collision_rename(&mut out, k.clone(), v.clone());
        }
        out
    }

    fn combine_with_missing_right(&self, left: &Record, right_fields: &IndexSet<String>) -> Record {
        let mut out = left.clone();
        for field in right_fields {
            insert_with_collision_rename(&mut out, field.clone(), self.null_value.clone());
        }
        out
    }

    fn combine_missing_left(&self, right: &Record, left_fields: &IndexSet<String>) -> Record {
        let mut out = Record::new();
        for field in left_fields {
            out.insert(field.clone(), self.null_value.clone());
        }
        for (k, v) in right {
            insert_with_collision_rename(&mut out, k.clone(), v.clone());
        }
        out
    }
}

/// Right-side conflicting key `k` becomes `r.k`, then `r.r.k`, … (`spec.md`
/// §4.7).
fn insert_with_collision_rename(out: &mut Record, mut key: String, value: Value) {
    while out.contains_key(&key) {
        key = format!("r.{key}");
    }
    out.insert(key, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn inner_join_drops_unmatched_left_rows() {
        let left = vec![
            rec(&[("id", Value::Int(1)), ("name", Value::String("a".into()))]),
            rec(&[("id", Value::Int(2)), ("name", Value::String("b".into()))]),
        ];
        let right = vec![rec(&[("id", Value::Int(1)), ("score", Value::Int(10))])];

        let merge = Merge::new(vec!["id".into()], vec!["id".into()], JoinKind::Inner);
        let joined = merge.join(left.into_iter(), right.into_iter());

        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0]["score"], Value::Int(10));
    }

    #[test]
    fn left_join_fills_unmatched_right_fields_with_null() {
        let left = vec![rec(&[("id", Value::Int(1))]), rec(&[("id", Value::Int(2))])];
        let right = vec![rec(&[("id", Value::Int(1)), ("score", Value::Int(10))])];

        let merge = Merge::new(vec!["id".into()], vec!["id".into()], JoinKind::Left);
        let joined = merge.join(left.into_iter(), right.into_iter());

        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0]["score"], Value::Int(10));
        assert_eq!(joined[1]["score"], Value::Null);
    }

    #[test]
    fn full_join_appends_unmatched_right_rows() {
        let left = vec![rec(&[("id", Value::Int(1))])];
        let right = vec![
            rec(&[("id", Value::Int(1)), ("score", Value::Int(10))]),
            rec(&[("id", Value::Int(99)), ("score", Value::Int(99))]),
        ];

        let merge = Merge::new(vec!["id".into()], vec!["id".into()], JoinKind::Full);
        let joined = merge.join(left.into_iter(), right.into_iter());

        assert_eq!(joined.len(), 2);
        assert_eq!(joined[1]["id"], Value::Null);
        assert_eq!(joined[1]["score"], Value::Int(99));
    }

    #[test]
    fn colliding_field_names_are_renamed_on_the_right() {
        let left = vec![rec(&[("id", Value::Int(1)), ("name", Value::String("left".into()))])];
        let right = vec![rec(&[("id", Value::Int(1)), ("name", Value::String("right".into()))])];

        let merge = Merge::new(vec!["id".into()], vec!["id".into()], JoinKind::Inner);
        let joined = merge.join(left.into_iter(), right.into_iter());

        assert_eq!(joined[0]["name"], Value::String("left".into()));
        assert_eq!(joined[0]["r.name"], Value::String("right".into()));
    }
}
