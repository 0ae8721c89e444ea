//! Stream transforms (component F): joins, grouping, pivoting, moving
//! windows, sampling, and field-shape operations over lazy record
//! sequences (`spec.md` §4.7).
//!
//! Everything here operates on `Iterator<Item = Record>`; the few
//! genuinely materializing operations (`Merge`'s right-hand side,
//! `Aggregate`, `Pivot`, `KeyIndexer`) say so in their own doc comments,
//! matching `spec.md` §4.7's contract that transforms are lazy "unless
//! explicitly materializing".

pub mod aggregate;
pub mod field_ops;
pub mod index;
pub mod merge;
pub mod pivot;
pub mod sample;
pub mod window;

use dk_record::Value;

pub use aggregate::{aggregate, reduce_aggregate, AggregateSpec, Reducer};
pub use field_ops::{iter_add_id, iter_drop, iter_rename};
pub use index::{KeyIndexer, MultiKeyIndexer};
pub use merge::{Merge, JoinKind};
pub use pivot::{pivot, reduce_pivot};
pub use sample::iter_sample;
pub use window::{Average, Gradient, Last, Max, Median, Min, MovingWindow, Sum, WindowFunction};

/// A grouping/join key representation: every transform that buckets
/// records by field value compares keys by their `Display` text rather
/// than deriving `Hash`/`Eq` on [`Value`] itself (`Value::Float`'s `f64`
/// makes that a lossy, surprising equality). This mirrors the original's
/// reliance on Python's structural equality for dict keys closely enough
/// for the key domains this spec actually declares (strings, ints, dates).
pub(crate) fn key_repr(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

pub(crate) fn composite_key(record: &dk_record::Record, fields: &[String]) -> Vec<String> {
    fields.iter().map(|f| key_repr(record.get(f))).collect()
}
