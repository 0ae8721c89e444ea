//! `Aggregate` / `Aggregates` / `reduce_aggregate` (`spec.md` §4.7):
//! group-by with either a list of named reducers or a streaming two-arg
//! fold that never materializes group membership.

use dk_record::{Record, Value};
use indexmap::IndexMap;

use crate::composite_key;

/// A named reducer over a column of collected values. `Median`/`Min`/`Max`
/// return `Value::Null` for an empty group (never observed in practice,
/// since a group always has at least the record that created it, but kept
/// total rather than panicking).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    First,
    Last,
}

impl Reducer {
    pub fn apply(self, values: &[Value]) -> Value {
        match self {
            Reducer::Count => Value::Int(values.len() as i64),
            Reducer::First => values.first().cloned().unwrap_or(Value::Null),
            Reducer::Last => values.last().cloned().unwrap_or(Value::Null),
            Reducer::Sum => {
                let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
                Value::Float(sum)
            }
            Reducer::Mean => {
                let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if nums.is_empty() {
                    Value::Null
                } else {
                    Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            Reducer::Min => fold_numeric(values, f64::min),
            Reducer::Max => fold_numeric(values, f64::max),
        }
    }
}

fn fold_numeric(values: &[Value], op: impl Fn(f64, f64) -> f64) -> Value {
    let mut nums = values.iter().filter_map(Value::as_f64);
    match nums.next() {
        Some(first) => Value::Float(nums.fold(first, op)),
        None => Value::Null,
    }
}

/// One `(output_name, input_field, reducer)` triple (`spec.md` §4.7).
pub struct AggregateSpec {
    pub output: String,
    pub input: String,
    pub reducer: Reducer,
}

impl AggregateSpec {
    pub fn new(output: impl Into<String>, input: impl Into<String>, reducer: Reducer) -> Self {
        AggregateSpec {
            output: output.into(),
            input: input.into(),
            reducer,
        }
    }
}

/// Materializing: every record in a group is buffered until the group-by
/// key changes no more input remains.
pub fn aggregate<I: Iterator<Item = Record>>(
    records: I,
    group_by: &[String],
    specs: &[AggregateSpec],
) -> Vec<Record> {
    let mut groups: IndexMap<Vec<String>, Vec<Record>> = IndexMap::new();
    for record in records {
        let key = composite_key(&record, group_by);
        groups.entry(key).or_default().push(record);
    }

    groups
        .into_values()
        .map(|members| {
            let mut out = Record::new();
            let first = &members[0];
            for field in group_by {
                out.insert(field.clone(), first.get(field).cloned().unwrap_or(Value::Null));
            }
            for spec in specs {
                let values: Vec<Value> = members
                    .iter()
                    .filter_map(|r| r.get(&spec.input).cloned())
                    .collect();
                out.insert(spec.output.clone(), spec.reducer.apply(&values));
            }
            out
        })
        .collect()
}

/// `reduce_aggregate` (`spec.md` §4.7): a two-argument reducer folded
/// incrementally per group, so only one running value per group is kept
/// rather than the full member list.
pub fn reduce_aggregate<I, F>(
    records: I,
    group_by: &[String],
    input_field: &str,
    output_field: &str,
    mut reducer: F,
) -> Vec<Record>
where
    I: Iterator<Item = Record>,
    F: FnMut(Value, Value) -> Value,
{
    let mut groups: IndexMap<Vec<String>, (Record, Option<Value>)> = IndexMap::new();

    for record in records {
        let key = composite_key(&record, group_by);
        let incoming = record.get(input_field).cloned().unwrap_or(Value::Null);
        let entry = groups
            .entry(key)
            .or_insert_with(|| (record.clone(), None));
        entry.1 = Some(match entry.1.take() {
            Some(current) => reducer(current, incoming),
            None => incoming,
        });
    }

    groups
        .into_values()
        .map(|(first, value)| {
            let mut out = Record::new();
            for field in group_by {
                out.insert(field.clone(), first.get(field).cloned().unwrap_or(Value::Null));
            }
            out.insert(output_field.to_string(), value.unwrap_or(Value::Null));
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(group: &str, amount: i64) -> Record {
        let mut r = Record::new();
        r.insert("group".into(), Value::String(group.to_string()));
        r.insert("amount".into(), Value::Int(amount));
        r
    }

    #[test]
    fn aggregates_sum_and_count_per_group() {
        let records = vec![rec("a", 10), rec("a", 20), rec("b", 5)];
        let specs = vec![
            AggregateSpec::new("total", "amount", Reducer::Sum),
            AggregateSpec::new("n", "amount", Reducer::Count),
        ];
        let out = aggregate(records.into_iter(), &["group".to_string()], &specs);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["total"], Value::Float(30.0));
        assert_eq!(out[0]["n"], Value::Int(2));
        assert_eq!(out[1]["total"], Value::Float(5.0));
    }

    #[test]
    fn reduce_aggregate_folds_without_materializing_groups() {
        let records = vec![rec("a", 10), rec("a", 20), rec("b", 5)];
        let out = reduce_aggregate(
            records.into_iter(),
            &["group".to_string()],
            "amount",
            "max",
            |acc, next| {
                let a = acc.as_f64().unwrap_or(f64::MIN);
                let b = next.as_f64().unwrap_or(f64::MIN);
                Value::Float(a.max(b))
            },
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["max"], Value::Float(20.0));
    }
}
