//! Python pickle codec (`spec.md` §4.3), for interoperating with data
//! produced by the original dkit toolkit. Framed the same way as
//! [`crate::msgpack_codec`]: one frame per batch of up to `chunk_size`
//! records, each frame a pickled list of dicts.
//!
//! Only the value domain `serde-pickle` can represent unambiguously is
//! supported: numbers, strings, bytes, bools, `None`, and lists/dicts of
//! those. Pickled Python objects (`__reduce__`, custom classes) are rejected
//! with [`CodecError::Pickle`] rather than silently coerced.

use dk_record::{Record, Value};
use dk_transport::{TransportRead, TransportWrite};
use serde_pickle::value::{HashableValue, Value as PickleValue};

use crate::framing::{read_frame, write_frame};
use crate::{project_for_read, project_for_write, CodecError, RecordIter, Sink, SinkOptions, SourceOptions};

fn pickle_to_value(v: PickleValue) -> Result<Value, CodecError> {
    Ok(match v {
        PickleValue::None => Value::Null,
        PickleValue::Bool(b) => Value::Bool(b),
        PickleValue::I64(i) => Value::Int(i),
        PickleValue::Int(big) => big
            .to_string()
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::String(big.to_string())),
        PickleValue::F64(f) => Value::Float(f),
        PickleValue::String(s) => Value::String(s),
        PickleValue::Bytes(b) => Value::Binary(b),
        other => {
            return Err(CodecError::Pickle(format!(
                "unsupported pickled value for a record field: {other:?}"
            )))
        }
    })
}

fn value_to_pickle(v: &Value) -> PickleValue {
    match v {
        Value::Null => PickleValue::None,
        Value::Bool(b) => PickleValue::Bool(*b),
        Value::Int(i) => PickleValue::I64(*i),
        Value::UInt(u) => PickleValue::I64(*u as i64),
        Value::Float(f) => PickleValue::F64(*f),
        Value::Decimal(d) => PickleValue::String(d.to_string()),
        Value::String(s) => PickleValue::String(s.clone()),
        Value::Binary(b) => PickleValue::Bytes(b.clone()),
        Value::Date(d) => PickleValue::String(d.to_string()),
        Value::DateTime(d) => PickleValue::String(d.to_rfc3339()),
        Value::Time(t) => PickleValue::String(t.to_string()),
    }
}

fn pickle_dict_to_record(v: PickleValue) -> Result<Record, CodecError> {
    match v {
        PickleValue::Dict(entries) => {
            let mut record = Record::new();
            for (k, v) in entries {
                let key = match k {
                    HashableValue::String(s) => s,
                    other => {
                        return Err(CodecError::Pickle(format!(
                            "record key is not a string: {other:?}"
                        )))
                    }
                };
                record.insert(key, pickle_to_value(v)?);
            }
            Ok(record)
        }
        other => Err(CodecError::Pickle(format!(
            "expected a pickled dict record, found {other:?}"
        ))),
    }
}

fn record_to_pickle_dict(record: &Record) -> PickleValue {
    PickleValue::Dict(
        record
            .iter()
            .map(|(k, v)| (HashableValue::String(k.clone()), value_to_pickle(v)))
            .collect(),
    )
}

pub fn source(mut reader: Box<dyn TransportRead>, opts: &SourceOptions) -> Result<RecordIter, CodecError> {
    let mut records = Vec::new();
    while let Some(payload) = read_frame(&mut reader)? {
        let value: PickleValue = serde_pickle::value_from_slice(&payload, Default::default())
            .map_err(|e| CodecError::Pickle(format!("failed to unpickle frame: {e}")))?;
        let PickleValue::List(items) = value else {
            return Err(CodecError::Pickle("expected a pickled list frame".into()));
        };
        for item in items {
            records.push(pickle_dict_to_record(item));
        }
    }

    let field_names = opts.field_names.clone();
    let records: Vec<_> = records
        .into_iter()
        .map(|r| r.and_then(|rec| project_for_read(rec, &field_names)))
        .collect();
    Ok(Box::new(records.into_iter()))
}

pub struct PickleSink {
    writer: Box<dyn TransportWrite>,
    field_names: Option<Vec<String>>,
    batch: Vec<Record>,
    chunk_size: usize,
}

pub fn sink(writer: Box<dyn TransportWrite>, opts: &SinkOptions) -> Result<Box<dyn Sink>, CodecError> {
    Ok(Box::new(PickleSink {
        writer,
        field_names: opts.field_names.clone(),
        batch: Vec::new(),
        chunk_size: opts.chunk_size(),
    }))
}

impl PickleSink {
    fn flush_batch(&mut self) -> Result<(), CodecError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let list = PickleValue::List(self.batch.drain(..).map(|r| record_to_pickle_dict(&r)).collect());
        let payload = serde_pickle::value_to_vec(&list, Default::default())
            .map_err(|e| CodecError::Pickle(format!("failed to pickle frame: {e}")))?;
        write_frame(&mut self.writer, &payload)?;
        Ok(())
    }
}

impl Sink for PickleSink {
    fn write(&mut self, record: &Record) -> Result<(), CodecError> {
        let projected = project_for_write(record, &self.field_names)?;
        self.batch.push(projected);
        if self.batch.len() >= self.chunk_size {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.flush_batch()?;
        self.writer.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_transport::{open_reader, open_writer};

    #[test]
    fn roundtrips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.pickle");

        let writer = open_writer("file", path.to_str().unwrap(), None).unwrap();
        let mut s = sink(writer, &SinkOptions::default()).unwrap();
        let mut rec = Record::new();
        rec.insert("name".into(), Value::String("alice".into()));
        rec.insert("age".into(), Value::Int(30));
        s.write(&rec).unwrap();
        s.finish().unwrap();

        let reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let records: Vec<_> = source(reader, &SourceOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], Value::String("alice".into()));
    }
}
