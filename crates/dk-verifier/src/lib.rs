//! Verifier (component K): a keyed, idempotent completion filter over an
//! iterator — skip items already marked done, process and mark the rest.
//!
//! Grounded on `original_source/dkit/etl/verifier.py::ShelveVerifier`
//! (`test_completed`/`iter_not_completed`/`iter_mark_as_complete`/
//! `mark_as_complete`), with the `shelve`-backed store replaced by
//! `dk-jsondb` (component J) per DESIGN.md Open Question 1, and the
//! `instrumentation.CounterLogger` stats counter ported to `dk-instrument`
//! (component L) directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("jsondb error: {0}")]
    JsonDb(#[from] dk_jsondb::JsonDbError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierRecord {
    pub timestamp: DateTime<Utc>,
}

impl Default for VerifierRecord {
    fn default() -> Self {
        VerifierRecord {
            timestamp: Utc::now(),
        }
    }
}

/// Tracks which keys have completed processing, backed by a JSON
/// directory store so state survives a restart.
pub struct Verifier {
    db: dk_jsondb::JsonDb,
    stats: dk_instrument::CounterLogger,
}

impl Verifier {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, VerifierError> {
        let db = dk_jsondb::JsonDb::open(path, dk_jsondb::JsonDbOptions::new())?;
        Ok(Verifier {
            db,
            stats: dk_instrument::CounterLogger::new("Verifier").start(),
        })
    }

    pub fn test_completed(&self, key: &str) -> bool {
        self.db.contains_key(key)
    }

    pub fn mark_as_complete(&self, key: &str) -> Result<(), VerifierError> {
        let record = VerifierRecord::default();
        let value = serde_json::to_value(&record).expect("VerifierRecord always serializes");
        self.db.append(key, &value)?;
        self.stats.increment(1);
        Ok(())
    }

    pub fn completed_count(&self) -> u64 {
        self.stats.value()
    }

    /// Filter a sequence of items down to those not yet completed,
    /// leaving marking to the caller (mirrors `iter_not_completed`).
    pub fn filter_not_completed<'a, T, F>(
        &'a self,
        items: impl Iterator<Item = T> + 'a,
        key_of: F,
    ) -> impl Iterator<Item = T> + 'a
    where
        F: Fn(&T) -> Option<String> + 'a,
    {
        items.filter(move |item| match key_of(item) {
            Some(key) => !self.test_completed(&key),
            None => true,
        })
    }

    /// Filter to items not yet completed and mark each one complete as
    /// it is yielded (mirrors `iter_mark_as_complete`).
    pub fn filter_mark_as_complete<'a, T, F>(
        &'a self,
        items: impl Iterator<Item = T> + 'a,
        key_of: F,
    ) -> impl Iterator<Item = T> + 'a
    where
        F: Fn(&T) -> Option<String> + 'a,
    {
        items.filter_map(move |item| match key_of(&item) {
            Some(key) => {
                if self.test_completed(&key) {
                    None
                } else {
                    self.mark_as_complete(&key).ok();
                    Some(item)
                }
            }
            None => Some(item),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_items_already_marked_complete() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = Verifier::open(dir.path()).unwrap();
        verifier.mark_as_complete("a").unwrap();

        let items = vec!["a".to_string(), "b".to_string()];
        let remaining: Vec<_> = verifier
            .filter_not_completed(items.into_iter(), |s| Some(s.clone()))
            .collect();
        assert_eq!(remaining, vec!["b".to_string()]);
    }

    #[test]
    fn mark_as_complete_variant_marks_items_as_they_are_yielded() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = Verifier::open(dir.path()).unwrap();

        let items = vec!["x".to_string(), "y".to_string()];
        let first_pass: Vec<_> = verifier
            .filter_mark_as_complete(items.clone().into_iter(), |s| Some(s.clone()))
            .collect();
        assert_eq!(first_pass, items);

        let second_pass: Vec<_> = verifier
            .filter_mark_as_complete(items.into_iter(), |s| Some(s.clone()))
            .collect();
        assert!(second_pass.is_empty());
        assert_eq!(verifier.completed_count(), 2);
    }
}
