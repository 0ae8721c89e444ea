//! Journal (component I): thread-safe accounting of in-flight messages
//! moving through a pipeline (H).
//!
//! Grounded on `original_source/dkit/multi_processing.py::Journal`
//! (`enter`/`complete`/`is_completed`/`empty`/`sync`, guarded by a lock,
//! backed by a dict-like object). The original's constructor accepts any
//! dict-like `database` (including a `shelve` file); here that is a
//! `JournalBackend` trait with an in-memory `HashMap` implementation and
//! a `dk-jsondb`-backed persistent implementation (see DESIGN.md Open
//! Question 1 for why `JSONDB` was chosen over porting `shelve` itself).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("jsondb error: {0}")]
    JsonDb(#[from] dk_jsondb::JsonDbError),
    #[error("no journal entry for id {0}")]
    MissingEntry(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub created: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(id: impl Into<String>) -> Self {
        Entry {
            id: id.into(),
            created: Utc::now(),
            completed: None,
        }
    }
}

pub trait JournalBackend: Send {
    fn insert(&mut self, entry: Entry) -> Result<(), JournalError>;
    fn get(&self, id: &str) -> Result<Option<Entry>, JournalError>;
    fn remove(&mut self, id: &str) -> Result<(), JournalError>;
    fn all_entries(&self) -> Result<Vec<Entry>, JournalError>;
    fn sync(&mut self) -> Result<(), JournalError>;
    fn len(&self) -> Result<usize, JournalError>;
}

/// Default backend: an in-process `HashMap`, equivalent to the Python
/// original's `database=None` default (`self.db = {}`).
#[derive(Default)]
pub struct MemoryBackend {
    entries: HashMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }
}

impl JournalBackend for MemoryBackend {
    fn insert(&mut self, entry: Entry) -> Result<(), JournalError> {
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Entry>, JournalError> {
        Ok(self.entries.get(id).cloned())
    }

    fn remove(&mut self, id: &str) -> Result<(), JournalError> {
        self.entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| JournalError::MissingEntry(id.to_string()))
    }

    fn all_entries(&self) -> Result<Vec<Entry>, JournalError> {
        Ok(self.entries.values().cloned().collect())
    }

    fn sync(&mut self) -> Result<(), JournalError> {
        Ok(())
    }

    fn len(&self) -> Result<usize, JournalError> {
        Ok(self.entries.len())
    }
}

/// Persistent backend on top of the JSON directory store (J), for
/// journals that must survive a process restart. Equivalent to the
/// original's `Journal.from_shelve`.
pub struct JsonDbBackend {
    db: dk_jsondb::JsonDb,
}

impl JsonDbBackend {
    pub fn new(db: dk_jsondb::JsonDb) -> Self {
        JsonDbBackend { db }
    }
}

impl JournalBackend for JsonDbBackend {
    fn insert(&mut self, entry: Entry) -> Result<(), JournalError> {
        let value = serde_json::to_value(&entry).map_err(dk_jsondb::JsonDbError::from)?;
        self.db.append(&entry.id, &value)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Entry>, JournalError> {
        match self.db.get(id) {
            Ok(value) => Ok(Some(serde_json::from_value(value).map_err(dk_jsondb::JsonDbError::from)?)),
            Err(dk_jsondb::JsonDbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&mut self, id: &str) -> Result<(), JournalError> {
        self.db.remove(id).map_err(JournalError::from)
    }

    fn all_entries(&self) -> Result<Vec<Entry>, JournalError> {
        self.db
            .keys()
            .into_iter()
            .map(|key| {
                self.get(&key)?
                    .ok_or_else(|| JournalError::MissingEntry(key.clone()))
            })
            .collect()
    }

    fn sync(&mut self) -> Result<(), JournalError> {
        Ok(())
    }

    fn len(&self) -> Result<usize, JournalError> {
        Ok(self.db.len())
    }
}

/// Thread-safe journal accounting message ids against a pluggable
/// backend. Messages themselves (`dk-pipeline`) are identified by a
/// plain `&str` id so this crate has no dependency on the pipeline's
/// message envelope types.
pub struct Journal {
    backend: Mutex<Box<dyn JournalBackend>>,
}

impl Journal {
    pub fn new(backend: Box<dyn JournalBackend>) -> Self {
        Journal {
            backend: Mutex::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Journal::new(Box::new(MemoryBackend::new()))
    }

    /// Record a new in-flight id.
    pub fn enter(&self, id: impl Into<String>) -> Result<(), JournalError> {
        let mut backend = self.backend.lock().unwrap();
        backend.insert(Entry::new(id))
    }

    /// Complete an id. When `accounting` is disabled the entry is
    /// dropped entirely; when enabled it is marked completed and kept
    /// (and the backend is synced), so `empty()` can later confirm every
    /// id that ever entered has since completed.
    pub fn complete(&self, id: &str, accounting: bool) -> Result<(), JournalError> {
        let mut backend = self.backend.lock().unwrap();
        if accounting {
            let mut entry = backend
                .get(id)?
                .ok_or_else(|| JournalError::MissingEntry(id.to_string()))?;
            entry.completed = Some(Utc::now());
            backend.insert(entry)?;
            backend.sync()
        } else {
            backend.remove(id)
        }
    }

    pub fn is_completed(&self, id: &str) -> bool {
        let backend = self.backend.lock().unwrap();
        matches!(backend.get(id), Ok(Some(entry)) if entry.completed.is_some())
    }

    /// True once every entry that ever entered the journal has completed
    /// (vacuously true for an empty journal).
    pub fn empty(&self) -> bool {
        let backend = self.backend.lock().unwrap();
        match backend.all_entries() {
            Ok(entries) => entries.iter().all(|e| e.completed.is_some()),
            Err(_) => false,
        }
    }

    pub fn sync(&self) -> Result<(), JournalError> {
        self.backend.lock().unwrap().sync()
    }

    pub fn len(&self) -> Result<usize, JournalError> {
        self.backend.lock().unwrap().len()
    }

    pub fn is_empty_backend(&self) -> Result<bool, JournalError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_accounting_complete_removes_the_entry() {
        let journal = Journal::in_memory();
        journal.enter("a").unwrap();
        assert_eq!(journal.len().unwrap(), 1);
        journal.complete("a", false).unwrap();
        assert_eq!(journal.len().unwrap(), 0);
    }

    #[test]
    fn with_accounting_complete_marks_but_keeps_the_entry() {
        let journal = Journal::in_memory();
        journal.enter("a").unwrap();
        assert!(!journal.is_completed("a"));
        journal.complete("a", true).unwrap();
        assert!(journal.is_completed("a"));
        assert_eq!(journal.len().unwrap(), 1);
    }

    #[test]
    fn empty_is_vacuously_true_and_false_while_pending() {
        let journal = Journal::in_memory();
        assert!(journal.empty());
        journal.enter("a").unwrap();
        assert!(!journal.empty());
        journal.complete("a", true).unwrap();
        assert!(journal.empty());
    }

    #[test]
    fn jsondb_backend_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dk_jsondb::JsonDb::open(dir.path(), dk_jsondb::JsonDbOptions::new()).unwrap();
        let journal = Journal::new(Box::new(JsonDbBackend::new(db)));
        journal.enter("a").unwrap();
        journal.complete("a", true).unwrap();
        assert!(journal.is_completed("a"));

        let db2 = dk_jsondb::JsonDb::open(dir.path(), dk_jsondb::JsonDbOptions::new()).unwrap();
        let journal2 = Journal::new(Box::new(JsonDbBackend::new(db2)));
        assert!(journal2.is_completed("a"));
    }
}
