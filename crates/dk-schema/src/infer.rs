//! Schema inference from a sample of records (`spec.md` §4.5).
//!
//! For each field, six independent "is this value compatible with type X"
//! flags are tracked, one per precedence rank below `String` (which is
//! always compatible and never tracked — it's the fallback). An
//! observation that fails to parse as rank *r* clears that flag for the
//! whole field; the winning type is the narrowest rank still set after the
//! whole sample has been scanned. This directly encodes `spec.md`'s
//! "any observation that cannot be parsed as a narrower type widens the
//! result; string absorbs everything".

use dk_record::{Record, Value};
use rand::Rng;

use crate::FieldType;

/// Bernoulli sampling policy: accept a record with probability `probability`
/// and stop once `stop_after` records have been accepted.
#[derive(Debug, Clone, Copy)]
pub struct SamplingPolicy {
    pub probability: f64,
    pub stop_after: usize,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        SamplingPolicy {
            probability: 1.0,
            stop_after: usize::MAX,
        }
    }
}

/// Precedence ranks narrow-to-wide, matching `spec.md`'s `{int} < {float} <
/// {bool} < {decimal} < {date} < {datetime}` (reversed from the spec's
/// wide-to-narrow listing); `String` and `Null` are not ranks here — `Null`
/// means "no non-null observation", `String` is the implicit fallback.
const RANKS: [fn(&FieldCompatibility) -> bool; 6] = [
    |c| c.int,
    |c| c.float,
    |c| c.bool,
    |c| c.decimal,
    |c| c.date,
    |c| c.datetime,
];

const RANK_TYPES: [FieldType; 6] = [
    FieldType::Int64,
    FieldType::Float,
    FieldType::Boolean,
    FieldType::Decimal,
    FieldType::Date,
    FieldType::DateTime,
];

#[derive(Debug, Clone, Copy)]
struct FieldCompatibility {
    int: bool,
    float: bool,
    bool: bool,
    decimal: bool,
    date: bool,
    datetime: bool,
}

impl Default for FieldCompatibility {
    fn default() -> Self {
        FieldCompatibility {
            int: true,
            float: true,
            bool: true,
            decimal: true,
            date: true,
            datetime: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldAccumulator {
    compat: FieldCompatibility,
    saw_null: bool,
    saw_any: bool,
    max_str_len: usize,
    signed: bool,
    max_abs_int: i128,
}

impl FieldAccumulator {
    pub fn observe(&mut self, value: &Value) {
        match value {
            Value::Null => self.saw_null = true,
            Value::String(s) => {
                self.saw_any = true;
                self.max_str_len = self.max_str_len.max(s.chars().count());
                self.observe_str(s);
            }
            other => {
                self.saw_any = true;
                let text = other.to_string();
                self.max_str_len = self.max_str_len.max(text.chars().count());
                let rank = match other {
                    Value::Int(_) | Value::UInt(_) => 0,
                    Value::Float(_) => 1,
                    Value::Bool(_) => 2,
                    Value::Decimal(_) => 3,
                    Value::Date(_) => 4,
                    Value::DateTime(_) => 5,
                    _ => 6, // Binary/Time: not in the precedence list, falls straight to String
                };
                self.disable_below(rank);
                if let (0, Some(i)) = (rank, other.as_i64()) {
                    self.signed = self.signed || i < 0;
                    self.max_abs_int = self.max_abs_int.max(i.unsigned_abs() as i128);
                }
            }
        }
    }

    /// Clears every compatibility rank below `rank` (0-indexed into
    /// [`RANKS`]); `rank == 6` clears everything, forcing `String`.
    fn disable_below(&mut self, rank: usize) {
        if rank > 0 {
            self.compat.int = false;
        }
        if rank > 1 {
            self.compat.float = false;
        }
        if rank > 2 {
            self.compat.bool = false;
        }
        if rank > 3 {
            self.compat.decimal = false;
        }
        if rank > 4 {
            self.compat.date = false;
        }
        if rank > 5 {
            self.compat.datetime = false;
        }
    }

    fn observe_str(&mut self, raw: &str) {
        let s = raw.trim();

        match parse_int_lenient(s) {
            Some(i) => {
                self.signed = self.signed || i < 0;
                self.max_abs_int = self.max_abs_int.max(i.unsigned_abs() as i128);
            }
            None => self.compat.int = false,
        }

        if s.parse::<f64>().is_err() {
            self.compat.float = false;
        }

        if !matches!(
            s.to_ascii_lowercase().as_str(),
            "true" | "false" | "yes" | "no"
        ) {
            self.compat.bool = false;
        }

        if s.parse::<rust_decimal::Decimal>().is_err() {
            self.compat.decimal = false;
        }

        if parse_date_lenient(s).is_none() {
            self.compat.date = false;
        }

        if parse_datetime_lenient(s).is_none() {
            self.compat.datetime = false;
        }
    }

    /// The winning type for this field, or `None` if no non-null value was
    /// ever observed (`spec.md`'s `null` precedence entry).
    pub fn winning_type(&self) -> Option<FieldType> {
        if !self.saw_any {
            return None;
        }
        for (check, ty) in RANKS.iter().zip(RANK_TYPES.iter()) {
            if check(&self.compat) {
                return Some(*ty);
            }
        }
        Some(FieldType::String)
    }

    pub fn nullable(&self) -> bool {
        self.saw_null
    }

    pub fn max_str_len(&self) -> usize {
        self.max_str_len
    }

    /// `(signed, required_width_bits)` for a numeric-winning field.
    pub fn numeric_width(&self) -> (bool, u32) {
        let width = if self.max_abs_int <= i8::MAX as i128 && !self.signed {
            8
        } else if self.max_abs_int <= i16::MAX as i128 {
            16
        } else if self.max_abs_int <= i32::MAX as i128 {
            32
        } else {
            64
        };
        (self.signed, width)
    }
}

pub(crate) fn parse_int_lenient(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    // Strip thousands separators (non-strict mode, `spec.md` §4.5).
    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<i64>().ok()
}

pub(crate) fn parse_date_lenient(s: &str) -> Option<chrono::NaiveDate> {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%m/%d/%Y"];
    FORMATS
        .iter()
        .find_map(|fmt| chrono::NaiveDate::parse_from_str(s, fmt).ok())
}

pub(crate) fn parse_datetime_lenient(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    const FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    FORMATS.iter().find_map(|fmt| {
        chrono::NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .map(|ndt| ndt.and_utc())
    })
}

/// Per-field inference accumulators, keyed by field name, in first-seen
/// order.
#[derive(Debug, Clone, Default)]
pub struct InferredSchema {
    pub fields: indexmap::IndexMap<String, FieldAccumulator>,
}

impl InferredSchema {
    pub fn observe_record(&mut self, record: &Record) {
        for (name, value) in record {
            self.fields.entry(name.clone()).or_default().observe(value);
        }
    }
}

/// Scans `records` under `policy`, accepting each with probability
/// `policy.probability` and stopping once `policy.stop_after` records have
/// been accepted.
pub fn infer<I: Iterator<Item = Record>>(records: I, policy: &SamplingPolicy) -> InferredSchema {
    let mut schema = InferredSchema::default();
    let mut accepted = 0usize;
    let mut rng = rand::thread_rng();

    for record in records {
        if accepted >= policy.stop_after {
            break;
        }
        if policy.probability < 1.0 && !rng.gen_bool(policy.probability.clamp(0.0, 1.0)) {
            continue;
        }
        schema.observe_record(&record);
        accepted += 1;
    }

    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sval(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn all_integers_infer_int() {
        let mut acc = FieldAccumulator::default();
        for v in ["1", "2", "3"] {
            acc.observe(&sval(v));
        }
        assert_eq!(acc.winning_type(), Some(FieldType::Int64));
    }

    #[test]
    fn mixed_int_and_float_widens_to_float() {
        let mut acc = FieldAccumulator::default();
        acc.observe(&sval("1"));
        acc.observe(&sval("1.5"));
        assert_eq!(acc.winning_type(), Some(FieldType::Float));
    }

    #[test]
    fn non_numeric_text_widens_to_string() {
        let mut acc = FieldAccumulator::default();
        acc.observe(&sval("1"));
        acc.observe(&sval("hello world"));
        assert_eq!(acc.winning_type(), Some(FieldType::String));
    }

    #[test]
    fn booleans_recognized_case_insensitively() {
        let mut acc = FieldAccumulator::default();
        acc.observe(&sval("True"));
        acc.observe(&sval("no"));
        assert_eq!(acc.winning_type(), Some(FieldType::Boolean));
    }

    #[test]
    fn all_null_infers_no_type() {
        let mut acc = FieldAccumulator::default();
        acc.observe(&Value::Null);
        acc.observe(&Value::Null);
        assert_eq!(acc.winning_type(), None);
        assert!(acc.nullable());
    }

    #[test]
    fn thousands_separator_stripped_in_lenient_mode() {
        assert_eq!(parse_int_lenient("1,234"), Some(1234));
    }

    #[test]
    fn infer_stops_after_configured_count() {
        let records = (0..100).map(|i| {
            let mut r = Record::new();
            r.insert("n".into(), Value::Int(i));
            r
        });
        let policy = SamplingPolicy {
            probability: 1.0,
            stop_after: 10,
        };
        let schema = infer(records, &policy);
        assert_eq!(schema.fields.len(), 1);
    }
}
