//! Codec sources and sinks (component C).
//!
//! Grounded on `estuary-flow`'s `parser::format` module: a `Parser` trait
//! producing a lazy `Output` iterator, and a `ParseError` enum covering every
//! failure surface a codec can hit (`parser::format::mod::ParseError`). Here
//! the trait is split into a `Source`-producing and `Sink`-producing half
//! since, unlike the teacher's parser (which only ever decodes), this codec
//! layer both reads and writes every format.

pub mod csv_codec;
pub mod framing;
pub mod json_codec;
pub mod jsonl_codec;
pub mod msgpack_codec;
pub mod parquet_codec;
pub mod pickle_codec;
pub mod sql_codec;

use dk_record::Record;
use thiserror::Error;

/// Default batch size used by sources/sinks over batched underlying formats
/// (Parquet, msgpack, pickle) and by SQL sink commits (`spec.md` §4.3).
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Default byte-chunk size for the JSONL source (`spec.md` §4.3).
pub const DEFAULT_JSONL_CHUNK_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] dk_transport::TransportError),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing field '{0}' while projecting a record")]
    MissingField(String),
    #[error("record stream is not seekable; reset is unsupported for this source")]
    UnsupportedReset,
    #[error("malformed frame: {0}")]
    Framing(String),
    #[error("msgpack decode error: {0}")]
    MsgPack(String),
    #[error("pickle decode error: {0}")]
    Pickle(String),
    #[error("parquet error: {0}")]
    Parquet(String),
    #[error("sql error: {0}")]
    Sql(String),
    #[error("unsupported value for this codec: {0}")]
    UnsupportedValue(String),
}

pub type RecordResult = Result<Record, CodecError>;

/// A lazy sequence of records (`spec.md` §4.3 `Source`).
pub type RecordIter = Box<dyn Iterator<Item = RecordResult> + Send>;

/// Options shared by every codec's `Source` constructor.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// If set, sources emit exactly these fields, in this order
    /// (`spec.md` §4.3 field projection contract).
    pub field_names: Option<Vec<String>>,
    pub chunk_size: Option<usize>,
}

impl SourceOptions {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }
}

/// Options shared by every codec's `Sink` constructor.
#[derive(Debug, Clone, Default)]
pub struct SinkOptions {
    pub field_names: Option<Vec<String>>,
    pub chunk_size: Option<usize>,
}

impl SinkOptions {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }
}

/// A consumer of records (`spec.md` §4.3 `Sink`). `finish` flushes any
/// buffered batch and closes the underlying transport's encoder.
pub trait Sink {
    fn write(&mut self, record: &Record) -> Result<(), CodecError>;
    fn finish(self: Box<Self>) -> Result<(), CodecError>;
}

/// Applies field projection to a record about to be written by a sink:
/// missing fields are a hard error (`spec.md` §4.3).
pub fn project_for_write(record: &Record, field_names: &Option<Vec<String>>) -> Result<Record, CodecError> {
    match field_names {
        None => Ok(record.clone()),
        Some(names) => dk_record::project(record, names)
            .map_err(|missing| CodecError::MissingField(missing.to_string())),
    }
}

/// Applies field projection to a record as read by a source: if
/// `field_names` is set, re-orders/filters to exactly those names, erroring
/// if any are absent.
pub fn project_for_read(record: Record, field_names: &Option<Vec<String>>) -> RecordResult {
    match field_names {
        None => Ok(record),
        Some(names) => dk_record::project(&record, names)
            .map_err(|missing| CodecError::MissingField(missing.to_string())),
    }
}
