//! `MovingWindow` (`spec.md` §4.7), ported from
//! `original_source/dkit/data/window.py`: a partition-by-keys, ordered
//! sliding window whose functions compose additively.
//!
//! The original composes functions with `window + Average(...) + Sum(...)`
//! via `__add__`; here that becomes `with_function`, a builder method,
//! since overloading `Add` for heterogeneous mutate-in-place composition
//! is not an idiom this codebase's teacher reaches for.

use std::collections::VecDeque;

use dk_record::{Record, Value};
use indexmap::IndexMap;

use crate::key_repr;

pub trait WindowFunction: Send {
    fn field(&self) -> &str;
    fn alias(&self) -> &str;
    fn compute(&self, values: &VecDeque<Value>) -> Value;
}

pub struct MovingWindow {
    lag: usize,
    truncate: bool,
    partition_by: Vec<String>,
    functions: Vec<Box<dyn WindowFunction>>,
}

impl MovingWindow {
    pub fn new(lag: usize) -> Self {
        MovingWindow {
            lag,
            truncate: true,
            partition_by: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Whether rows whose window is not yet full are dropped (`true`,
    /// default) or surfaced with the function's `na` fill (`false`)
    /// (`spec.md` §4.7).
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn partition_by(mut self, fields: Vec<String>) -> Self {
        self.partition_by = fields;
        self
    }

    pub fn with_function(mut self, function: Box<dyn WindowFunction>) -> Self {
        self.functions.push(function);
        self
    }

    pub fn apply<I: Iterator<Item = Record>>(&self, records: I) -> Vec<Record> {
        let mut accumulators: IndexMap<Vec<String>, IndexMap<String, VecDeque<Value>>> = IndexMap::new();
        let mut output = Vec::new();

        for mut row in records {
            let partition_key: Vec<String> = self
                .partition_by
                .iter()
                .map(|f| key_repr(row.get(f)))
                .collect();
            let partition = accumulators.entry(partition_key).or_default();

            for function in &self.functions {
                let values = partition
                    .entry(function.field().to_string())
                    .or_insert_with(|| VecDeque::with_capacity(self.lag));
                if values.len() == self.lag {
                    values.pop_front();
                }
                values.push_back(row.get(function.field()).cloned().unwrap_or(Value::Null));
            }

            let mut any_ready = false;
            for function in &self.functions {
                let values = &partition[function.field()];
                if values.len() < self.lag {
                    row.insert(function.alias().to_string(), Value::Null);
                } else {
                    row.insert(function.alias().to_string(), function.compute(values));
                    any_ready = true;
                }
            }

            if any_ready || !self.truncate {
                output.push(row);
            }
        }

        output
    }
}

fn numeric(values: &VecDeque<Value>) -> Vec<f64> {
    values.iter().filter_map(Value::as_f64).collect()
}

macro_rules! window_function {
    ($name:ident, $suffix:literal, $compute:expr) => {
        pub struct $name {
            field: String,
            alias: String,
        }

        impl $name {
            pub fn new(field: impl Into<String>) -> Self {
                let field = field.into();
                let alias = format!("{field}_{}", $suffix);
                $name { field, alias }
            }

            pub fn alias(mut self, name: impl Into<String>) -> Self {
                self.alias = name.into();
                self
            }
        }

        impl WindowFunction for $name {
            fn field(&self) -> &str {
                &self.field
            }
            fn alias(&self) -> &str {
                &self.alias
            }
            fn compute(&self, values: &VecDeque<Value>) -> Value {
                $compute(values)
            }
        }
    };
}

window_function!(Average, "ma", |values: &VecDeque<Value>| {
    let nums = numeric(values);
    if nums.is_empty() {
        Value::Null
    } else {
        Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
    }
});

window_function!(Sum, "sum", |values: &VecDeque<Value>| {
    Value::Float(numeric(values).iter().sum())
});

window_function!(Max, "max", |values: &VecDeque<Value>| {
    numeric(values)
        .into_iter()
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
        .map(Value::Float)
        .unwrap_or(Value::Null)
});

window_function!(Min, "min", |values: &VecDeque<Value>| {
    numeric(values)
        .into_iter()
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
        .map(Value::Float)
        .unwrap_or(Value::Null)
});

window_function!(Median, "median", |values: &VecDeque<Value>| {
    let mut nums = numeric(values);
    if nums.is_empty() {
        return Value::Null;
    }
    nums.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = nums.len() / 2;
    let median = if nums.len() % 2 == 0 {
        (nums[mid - 1] + nums[mid]) / 2.0
    } else {
        nums[mid]
    };
    Value::Float(median)
});

window_function!(Last, "last", |values: &VecDeque<Value>| {
    values.back().cloned().unwrap_or(Value::Null)
});

/// Least-squares slope of `values` against `0..len` (`spec.md` §4.7
/// `Gradient`; ported from the original's `scipy.stats.linregress`, whose
/// slope term this reimplements directly since no linear-algebra crate is
/// otherwise needed by this workspace).
pub struct Gradient {
    field: String,
    alias: String,
}

impl Gradient {
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        let alias = format!("{field}_gr");
        Gradient { field, alias }
    }

    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.alias = name.into();
        self
    }
}

impl WindowFunction for Gradient {
    fn field(&self) -> &str {
        &self.field
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    fn compute(&self, values: &VecDeque<Value>) -> Value {
        let ys = numeric(values);
        if ys.len() < 2 {
            return Value::Null;
        }
        let n = ys.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = ys.iter().sum::<f64>() / n;
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (i, y) in ys.iter().enumerate() {
            let dx = i as f64 - mean_x;
            numerator += dx * (y - mean_y);
            denominator += dx * dx;
        }
        if denominator == 0.0 {
            Value::Float(0.0)
        } else {
            Value::Float(numerator / denominator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(partition: &str, value: i64) -> Record {
        let mut r = Record::new();
        r.insert("partition".into(), Value::String(partition.to_string()));
        r.insert("value".into(), Value::Int(value));
        r
    }

    #[test]
    fn truncates_rows_until_the_window_is_full() {
        let window = MovingWindow::new(3)
            .partition_by(vec!["partition".to_string()])
            .with_function(Box::new(Average::new("value")));

        let records = vec![rec("a", 1), rec("a", 2), rec("a", 3), rec("a", 4)];
        let out = window.apply(records.into_iter());

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["value_ma"], Value::Float(2.0));
        assert_eq!(out[1]["value_ma"], Value::Float(3.0));
    }

    #[test]
    fn surfaces_na_rows_when_truncate_is_disabled() {
        let window = MovingWindow::new(3)
            .truncate(false)
            .with_function(Box::new(Sum::new("value")));

        let records = vec![rec("a", 1), rec("a", 2)];
        let out = window.apply(records.into_iter());

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["value_sum"], Value::Null);
    }

    #[test]
    fn functions_compose_additively_via_builder() {
        let window = MovingWindow::new(2)
            .with_function(Box::new(Sum::new("value")))
            .with_function(Box::new(Max::new("value")));

        let out = window.apply(vec![rec("a", 1), rec("a", 5)].into_iter());
        assert_eq!(out[0]["value_sum"], Value::Float(6.0));
        assert_eq!(out[0]["value_max"], Value::Float(5.0));
    }

    #[test]
    fn gradient_is_positive_for_an_increasing_series() {
        let window = MovingWindow::new(3).with_function(Box::new(Gradient::new("value")));
        let out = window.apply(vec![rec("a", 1), rec("a", 2), rec("a", 3)].into_iter());
        let slope = out[0]["value_gr"].as_f64().unwrap();
        assert!(slope > 0.0);
    }
}
