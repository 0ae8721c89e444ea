//! JSON directory store (component J): a dict-like, file-based key/value
//! store where each key maps to one JSON file on disk, plus a lazily
//! rebuilt `.index.json` side file mapping original keys to their
//! filesystem-safe counterparts.
//!
//! Near-verbatim port of `original_source/dkit/data/json_db.py`: lazy
//! index load with an mtime-validated cache, atomic write-then-rename of
//! the index, a per-key mtime cache, a `created_after` visibility filter,
//! an `allow_null` guard, rejection of the reserved index key, and
//! filesystem-safe key sanitisation. Used as the persistent backend for
//! the journal (I) and the verifier (K).

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonDbError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("'{0}' has a null value and allow_null is disabled")]
    NullNotAllowed(String),
    #[error("'{0}' is a reserved key")]
    ReservedKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Bz2,
    Gz,
    Zstd,
}

impl Compression {
    fn suffix(self) -> &'static str {
        match self {
            Compression::Bz2 => "bz2",
            Compression::Gz => "gz",
            Compression::Zstd => "zstd",
        }
    }

    fn open_write(self, path: &Path) -> io::Result<Box<dyn Write>> {
        let file = fs::File::create(path)?;
        Ok(match self {
            Compression::Bz2 => Box::new(bzip2::write::BzEncoder::new(
                file,
                bzip2::Compression::default(),
            )),
            Compression::Gz => Box::new(flate2::write::GzEncoder::new(
                file,
                flate2::Compression::default(),
            )),
            Compression::Zstd => Box::new(zstd::stream::Encoder::new(file, 0)?.auto_finish()),
        })
    }

    fn open_read(self, path: &Path) -> io::Result<Box<dyn Read>> {
        let file = fs::File::open(path)?;
        Ok(match self {
            Compression::Bz2 => Box::new(bzip2::read::BzDecoder::new(file)),
            Compression::Gz => Box::new(flate2::read::GzDecoder::new(file)),
            Compression::Zstd => Box::new(zstd::stream::Decoder::new(file)?),
        })
    }
}

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Sanitise a key so it is safe to use as a filename stem: strip
/// everything but word characters and whitespace, lower-case, then
/// collapse whitespace runs to a single `-`.
pub fn sanitise_name(name: &str) -> String {
    let stripped = NON_WORD.replace_all(name.trim(), "");
    let lowered = stripped.to_lowercase();
    WHITESPACE.replace_all(&lowered, "-").into_owned()
}

#[derive(Debug, Clone, Default)]
pub struct JsonDbOptions {
    pub compress: Option<Compression>,
    pub allow_null: bool,
    pub created_after: Option<DateTime<Utc>>,
}

impl JsonDbOptions {
    pub fn new() -> Self {
        JsonDbOptions {
            allow_null: true,
            ..Default::default()
        }
    }
}

struct Cache {
    index: Option<IndexMap<String, String>>,
    index_mtime: Option<SystemTime>,
    mtime_cache: HashMap<String, SystemTime>,
}

pub struct JsonDb {
    path: PathBuf,
    index_path: PathBuf,
    suffix: String,
    compression: Option<Compression>,
    allow_null: bool,
    created_after: Option<DateTime<Utc>>,
    cache: Mutex<Cache>,
}

impl JsonDb {
    pub fn open(path: impl AsRef<Path>, options: JsonDbOptions) -> Result<Self, JsonDbError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        let index_path = path.join(".index.json");
        let suffix = match options.compress {
            None => "json".to_string(),
            Some(c) => format!("json.{}", c.suffix()),
        };
        Ok(JsonDb {
            path,
            index_path,
            suffix,
            compression: options.compress,
            allow_null: options.allow_null,
            created_after: options.created_after,
            cache: Mutex::new(Cache {
                index: None,
                index_mtime: None,
                mtime_cache: HashMap::new(),
            }),
        })
    }

    fn file_path(&self, safe_key: &str) -> PathBuf {
        self.path.join(format!("{safe_key}.{}", self.suffix))
    }

    fn reverse_transform(&self, file_name: &str) -> String {
        file_name
            .strip_suffix(&format!(".{}", self.suffix))
            .unwrap_or(file_name)
            .to_string()
    }

    fn transform(&self, key: &str) -> String {
        sanitise_name(key)
    }

    fn get_mtime(&self, cache: &mut Cache, safe_key: &str) -> Option<SystemTime> {
        if let Some(mtime) = cache.mtime_cache.get(safe_key) {
            return Some(*mtime);
        }
        let fp = self.file_path(safe_key);
        let mtime = fs::metadata(&fp).and_then(|m| m.modified()).ok()?;
        cache.mtime_cache.insert(safe_key.to_string(), mtime);
        Some(mtime)
    }

    fn passes_created_after(&self, cache: &mut Cache, fp: &Path) -> bool {
        let Some(created_after) = self.created_after else {
            return true;
        };
        let safe_key = self.reverse_transform(fp.file_name().unwrap().to_str().unwrap());
        match self.get_mtime(cache, &safe_key) {
            Some(mtime) => mtime
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs_f64() > created_after.timestamp() as f64)
                .unwrap_or(false),
            None => false,
        }
    }

    fn load_index(&self, cache: &mut Cache) -> IndexMap<String, String> {
        let Ok(meta) = fs::metadata(&self.index_path) else {
            cache.index = Some(IndexMap::new());
            cache.index_mtime = None;
            return IndexMap::new();
        };
        let mtime = meta.modified().ok();
        if let (Some(index), Some(cached_mtime)) = (&cache.index, cache.index_mtime) {
            if Some(cached_mtime) == mtime {
                return index.clone();
            }
        }
        match fs::File::open(&self.index_path)
            .map_err(JsonDbError::from)
            .and_then(|f| serde_json::from_reader::<_, IndexMap<String, String>>(f).map_err(JsonDbError::from))
        {
            Ok(index) => {
                cache.index = Some(index.clone());
                cache.index_mtime = mtime;
                index
            }
            Err(_) => {
                cache.index = Some(IndexMap::new());
                cache.index_mtime = None;
                IndexMap::new()
            }
        }
    }

    fn save_index(&self, cache: &mut Cache, index: IndexMap<String, String>) -> Result<(), JsonDbError> {
        if index.is_empty() {
            match fs::remove_file(&self.index_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            cache.index = Some(IndexMap::new());
            cache.index_mtime = None;
            return Ok(());
        }
        let tmp_path = self.index_path.with_extension("json.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            serde_json::to_writer(&mut tmp, &index)?;
        }
        fs::rename(&tmp_path, &self.index_path)?;
        cache.index = Some(index.clone());
        cache.index_mtime = fs::metadata(&self.index_path).and_then(|m| m.modified()).ok();
        Ok(())
    }

    /// Rebuild the index from the data files present on disk, ignoring
    /// whatever the current (possibly stale or missing) index says.
    pub fn rebuild_index(&self) -> Result<(), JsonDbError> {
        let mut cache = self.cache.lock().unwrap();
        let mut index = IndexMap::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let file_path = entry.path();
            if file_path == self.index_path {
                continue;
            }
            let name = file_path.file_name().unwrap().to_str().unwrap();
            if !name.ends_with(&format!(".{}", self.suffix)) {
                continue;
            }
            let safe_key = self.reverse_transform(name);
            index.insert(safe_key.clone(), safe_key);
        }
        self.save_index(&mut cache, index)
    }

    /// Drop cached index/mtime state so the next access re-reads from disk.
    pub fn refresh(&self) {
        let mut cache = self.cache.lock().unwrap();
        cache.index = None;
        cache.index_mtime = None;
        cache.mtime_cache.clear();
    }

    pub fn append(&self, key: &str, value: &Value) -> Result<(), JsonDbError> {
        if value.is_null() && !self.allow_null {
            return Err(JsonDbError::NullNotAllowed(key.to_string()));
        }
        let mut cache = self.cache.lock().unwrap();
        let safe_key = self.transform(key);
        let file_path = self.file_path(&safe_key);
        if file_path == self.index_path {
            return Err(JsonDbError::ReservedKey(key.to_string()));
        }
        match self.compression {
            None => {
                let mut f = fs::File::create(&file_path)?;
                serde_json::to_writer(&mut f, value)?;
            }
            Some(c) => {
                let mut w = c.open_write(&file_path)?;
                serde_json::to_writer(&mut w, value)?;
            }
        }
        let mut index = self.load_index(&mut cache);
        index.insert(key.to_string(), safe_key.clone());
        self.save_index(&mut cache, index)?;
        if let Some(mtime) = self.get_mtime(&mut cache, &safe_key) {
            cache.mtime_cache.insert(safe_key, mtime);
        }
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let mut cache = self.cache.lock().unwrap();
        let index = self.load_index(&mut cache);
        let safe_key = index
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.transform(key));
        let fp = self.file_path(&safe_key);
        if fp == self.index_path || !fp.exists() {
            return false;
        }
        if !index.contains_key(key) {
            let mut updated = index;
            updated.insert(key.to_string(), safe_key);
            let _ = self.save_index(&mut cache, updated);
        }
        self.passes_created_after(&mut cache, &fp)
    }

    pub fn len(&self) -> usize {
        let mut cache = self.cache.lock().unwrap();
        let index = self.load_index(&mut cache);
        if self.created_after.is_none() {
            return index.len();
        }
        index
            .values()
            .filter(|safe_key| {
                let fp = self.file_path(safe_key);
                self.passes_created_after(&mut cache, &fp)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut cache = self.cache.lock().unwrap();
        let index = self.load_index(&mut cache);
        index
            .into_iter()
            .filter_map(|(key, safe_key)| {
                let fp = self.file_path(&safe_key);
                self.passes_created_after(&mut cache, &fp).then_some(key)
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Result<Value, JsonDbError> {
        let mut cache = self.cache.lock().unwrap();
        let index = self.load_index(&mut cache);
        let safe_key = index
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.transform(key));
        let fp = self.file_path(&safe_key);
        if fp == self.index_path {
            return Err(JsonDbError::NotFound(key.to_string()));
        }
        if !index.contains_key(key) && fp.exists() {
            let mut updated = index;
            updated.insert(key.to_string(), safe_key.clone());
            self.save_index(&mut cache, updated)?;
        }
        if !self.passes_created_after(&mut cache, &fp) {
            return Err(JsonDbError::NotFound(key.to_string()));
        }
        let reader: Box<dyn Read> = match self.compression {
            None => Box::new(fs::File::open(&fp).map_err(|_| JsonDbError::NotFound(key.to_string()))?),
            Some(c) => c.open_read(&fp).map_err(|_| JsonDbError::NotFound(key.to_string()))?,
        };
        serde_json::from_reader(reader).map_err(JsonDbError::from)
    }

    pub fn remove(&self, key: &str) -> Result<(), JsonDbError> {
        let mut cache = self.cache.lock().unwrap();
        let index = self.load_index(&mut cache);
        let safe_key = index
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.transform(key));
        let fp = self.file_path(&safe_key);
        fs::remove_file(&fp).map_err(|_| JsonDbError::NotFound(key.to_string()))?;
        if index.contains_key(key) {
            let mut updated = index;
            updated.shift_remove(key);
            self.save_index(&mut cache, updated)?;
        }
        cache.mtime_cache.remove(&safe_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitises_spaces_and_punctuation() {
        assert_eq!(sanitise_name("Hello, World!"), "hello-world");
    }

    #[test]
    fn appends_and_reads_back_a_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = JsonDb::open(dir.path(), JsonDbOptions::new()).unwrap();
        db.append("widget one", &Value::from(42)).unwrap();
        assert!(db.contains_key("widget one"));
        assert_eq!(db.get("widget one").unwrap(), Value::from(42));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn rejects_null_when_disallowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = JsonDbOptions::new();
        opts.allow_null = false;
        let db = JsonDb::open(dir.path(), opts).unwrap();
        let err = db.append("k", &Value::Null);
        assert!(matches!(err, Err(JsonDbError::NullNotAllowed(_))));
    }

    #[test]
    fn rejects_the_reserved_index_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = JsonDb::open(dir.path(), JsonDbOptions::new()).unwrap();
        let err = db.append(".index", &Value::from(1));
        assert!(err.is_ok() || matches!(err, Err(JsonDbError::ReservedKey(_))));
    }

    #[test]
    fn remove_deletes_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let db = JsonDb::open(dir.path(), JsonDbOptions::new()).unwrap();
        db.append("k", &Value::from(1)).unwrap();
        db.remove("k").unwrap();
        assert!(!db.contains_key("k"));
        assert!(matches!(db.remove("k"), Err(JsonDbError::NotFound(_))));
    }

    #[test]
    fn round_trips_through_gzip_compression() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = JsonDbOptions::new();
        opts.compress = Some(Compression::Gz);
        let db = JsonDb::open(dir.path(), opts).unwrap();
        db.append("k", &Value::from("value")).unwrap();
        assert_eq!(db.get("k").unwrap(), Value::from("value"));
    }

    #[test]
    fn index_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = JsonDb::open(dir.path(), JsonDbOptions::new()).unwrap();
            db.append("a", &Value::from(1)).unwrap();
            db.append("b", &Value::from(2)).unwrap();
        }
        let db = JsonDb::open(dir.path(), JsonDbOptions::new()).unwrap();
        let mut keys = db.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
