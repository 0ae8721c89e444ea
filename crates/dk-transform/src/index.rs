//! `KeyIndexer` / `MultiKeyIndexer` (`spec.md` §4.7): materializing,
//! in-memory key → records maps. `Merge` builds one of these internally
//! over its right-hand input; both are also exposed directly for callers
//! that want the index without a join attached.

use dk_record::Record;
use indexmap::IndexMap;

use crate::{composite_key, key_repr};

pub struct KeyIndexer {
    index: IndexMap<String, Vec<Record>>,
}

impl KeyIndexer {
    pub fn build<I: Iterator<Item = Record>>(records: I, key_field: &str) -> Self {
        let mut index: IndexMap<String, Vec<Record>> = IndexMap::new();
        for record in records {
            let key = key_repr(record.get(key_field));
            index.entry(key).or_default().push(record);
        }
        KeyIndexer { index }
    }

    pub fn get(&self, key: &str) -> Option<&[Record]> {
        self.index.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

pub struct MultiKeyIndexer {
    index: IndexMap<Vec<String>, Vec<Record>>,
}

impl MultiKeyIndexer {
    pub fn build<I: Iterator<Item = Record>>(records: I, key_fields: &[String]) -> Self {
        let mut index: IndexMap<Vec<String>, Vec<Record>> = IndexMap::new();
        for record in records {
            let key = composite_key(&record, key_fields);
            index.entry(key).or_default().push(record);
        }
        MultiKeyIndexer { index }
    }

    pub fn get(&self, key: &[String]) -> Option<&[Record]> {
        self.index.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
