//! `Pivot` / `ReducePivot` (`spec.md` §4.7): row key × column key → value.
//! `pivot` collects every cell's values before reducing; `reduce_pivot`
//! folds each cell incrementally, keeping only `O(rows × columns)` running
//! values rather than every contributing record.

use dk_record::{Record, Value};
use indexmap::IndexMap;

use crate::aggregate::Reducer;
use crate::{composite_key, key_repr};

pub fn pivot<I: Iterator<Item = Record>>(
    records: I,
    row_key: &[String],
    col_key: &str,
    value_field: &str,
    reducer: Reducer,
) -> Vec<Record> {
    let mut rows: IndexMap<Vec<String>, (Record, IndexMap<String, Vec<Value>>)> = IndexMap::new();

    for record in records {
        let rkey = composite_key(&record, row_key);
        let ckey = key_repr(record.get(col_key));
        let value = record.get(value_field).cloned().unwrap_or(Value::Null);
        let entry = rows.entry(rkey).or_insert_with(|| (record.clone(), IndexMap::new()));
        entry.1.entry(ckey).or_default().push(value);
    }

    rows.into_values()
        .map(|(first, columns)| {
            let mut out = Record::new();
            for field in row_key {
                out.insert(field.clone(), first.get(field).cloned().unwrap_or(Value::Null));
            }
            for (col, values) in columns {
                out.insert(col, reducer.apply(&values));
            }
            out
        })
        .collect()
}

pub fn reduce_pivot<I, F>(
    records: I,
    row_key: &[String],
    col_key: &str,
    value_field: &str,
    mut reducer: F,
) -> Vec<Record>
where
    I: Iterator<Item = Record>,
    F: FnMut(Value, Value) -> Value,
{
    let mut rows: IndexMap<Vec<String>, (Record, IndexMap<String, Value>)> = IndexMap::new();

    for record in records {
        let rkey = composite_key(&record, row_key);
        let ckey = key_repr(record.get(col_key));
        let value = record.get(value_field).cloned().unwrap_or(Value::Null);
        let entry = rows.entry(rkey).or_insert_with(|| (record.clone(), IndexMap::new()));
        match entry.1.shift_remove(&ckey) {
            Some(current) => {
                let merged = reducer(current, value);
                entry.1.insert(ckey, merged);
            }
            None => {
                entry.1.insert(ckey, value);
            }
        }
    }

    rows.into_values()
        .map(|(first, columns)| {
            let mut out = Record::new();
            for field in row_key {
                out.insert(field.clone(), first.get(field).cloned().unwrap_or(Value::Null));
            }
            for (col, value) in columns {
                out.insert(col, value);
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(region: &str, product: &str, amount: i64) -> Record {
        let mut r = Record::new();
        r.insert("region".into(), Value::String(region.to_string()));
        r.insert("product".into(), Value::String(product.to_string()));
        r.insert("amount".into(), Value::Int(amount));
        r
    }

    #[test]
    fn pivots_rows_by_column_key_summing_values() {
        let records = vec![
            rec("east", "widget", 10),
            rec("east", "widget", 5),
            rec("east", "gadget", 3),
            rec("west", "widget", 7),
        ];
        let out = pivot(records.into_iter(), &["region".to_string()], "product", "amount", Reducer::Sum);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["widget"], Value::Float(15.0));
        assert_eq!(out[0]["gadget"], Value::Float(3.0));
        assert_eq!(out[1]["widget"], Value::Float(7.0));
    }

    #[test]
    fn reduce_pivot_folds_cells_incrementally() {
        let records = vec![rec("east", "widget", 10), rec("east", "widget", 5)];
        let out = reduce_pivot(
            records.into_iter(),
            &["region".to_string()],
            "product",
            "amount",
            |a, b| Value::Int(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
        );
        assert_eq!(out[0]["widget"], Value::Int(15));
    }
}
