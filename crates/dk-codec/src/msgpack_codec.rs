//! MessagePack codec (`spec.md` §4.3). Records are batched: each frame
//! (see [`crate::framing`]) holds a MessagePack array of up to `chunk_size`
//! record maps, framed with a big-endian `u32` length prefix.

use dk_record::{Record, Value};
use dk_transport::{TransportRead, TransportWrite};
use rmpv::Value as Rmpv;

use crate::framing::{read_frame, write_frame};
use crate::{project_for_read, project_for_write, CodecError, RecordIter, Sink, SinkOptions, SourceOptions};

fn rmpv_to_value(v: Rmpv) -> Value {
    match v {
        Rmpv::Nil => Value::Null,
        Rmpv::Boolean(b) => Value::Bool(b),
        Rmpv::Integer(i) => {
            if let Some(i) = i.as_i64() {
                Value::Int(i)
            } else if let Some(u) = i.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(i.as_f64().unwrap_or(f64::NAN))
            }
        }
        Rmpv::F32(f) => Value::Float(f as f64),
        Rmpv::F64(f) => Value::Float(f),
        Rmpv::String(s) => Value::String(s.into_str().unwrap_or_default()),
        Rmpv::Binary(b) => Value::Binary(b),
        Rmpv::Array(items) => Value::String(format!("{:?}", items)),
        Rmpv::Map(_) => Value::String("<nested map>".to_string()),
        Rmpv::Ext(_, bytes) => Value::Binary(bytes),
    }
}

fn value_to_rmpv(v: &Value) -> Rmpv {
    match v {
        Value::Null => Rmpv::Nil,
        Value::Bool(b) => Rmpv::Boolean(*b),
        Value::Int(i) => Rmpv::Integer((*i).into()),
        Value::UInt(u) => Rmpv::Integer((*u).into()),
        Value::Float(f) => Rmpv::F64(*f),
        Value::Decimal(d) => Rmpv::String(d.to_string().into()),
        Value::String(s) => Rmpv::String(s.clone().into()),
        Value::Binary(b) => Rmpv::Binary(b.clone()),
        Value::Date(d) => Rmpv::String(d.to_string().into()),
        Value::DateTime(d) => Rmpv::String(d.to_rfc3339().into()),
        Value::Time(t) => Rmpv::String(t.to_string().into()),
    }
}

fn record_to_rmpv(record: &Record) -> Rmpv {
    Rmpv::Map(
        record
            .iter()
            .map(|(k, v)| (Rmpv::String(k.clone().into()), value_to_rmpv(v)))
            .collect(),
    )
}

fn rmpv_to_record(v: Rmpv) -> Result<Record, CodecError> {
    match v {
        Rmpv::Map(entries) => {
            let mut record = Record::new();
            for (k, v) in entries {
                let key = k
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CodecError::MsgPack("record key is not a string".into()))?;
                record.insert(key, rmpv_to_value(v));
            }
            Ok(record)
        }
        other => Err(CodecError::MsgPack(format!(
            "expected a msgpack map record, found {other:?}"
        ))),
    }
}

pub fn source(mut reader: Box<dyn TransportRead>, opts: &SourceOptions) -> Result<RecordIter, CodecError> {
    let mut records = Vec::new();
    while let Some(payload) = read_frame(&mut reader)? {
        let value: Rmpv = rmpv::decode::read_value(&mut &payload[..])
            .map_err(|e| CodecError::MsgPack(format!("failed to decode frame: {e}")))?;
        let Rmpv::Array(items) = value else {
            return Err(CodecError::MsgPack("expected a msgpack array frame".into()));
        };
        for item in items {
            records.push(rmpv_to_record(item));
        }
    }

    let field_names = opts.field_names.clone();
    let records: Vec<_> = records
        .into_iter()
        .map(|r| r.and_then(|rec| project_for_read(rec, &field_names)))
        .collect();
    Ok(Box::new(records.into_iter()))
}

pub struct MsgPackSink {
    writer: Box<dyn TransportWrite>,
    field_names: Option<Vec<String>>,
    batch: Vec<Record>,
    chunk_size: usize,
}

pub fn sink(writer: Box<dyn TransportWrite>, opts: &SinkOptions) -> Result<Box<dyn Sink>, CodecError> {
    Ok(Box::new(MsgPackSink {
        writer,
        field_names: opts.field_names.clone(),
        batch: Vec::new(),
        chunk_size: opts.chunk_size(),
    }))
}

impl MsgPackSink {
    fn flush_batch(&mut self) -> Result<(), CodecError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let array = Rmpv::Array(self.batch.drain(..).map(|r| record_to_rmpv(&r)).collect());
        let mut payload = Vec::new();
        rmpv::encode::write_value(&mut payload, &array)
            .map_err(|e| CodecError::MsgPack(format!("failed to encode frame: {e}")))?;
        write_frame(&mut self.writer, &payload)?;
        Ok(())
    }
}

impl Sink for MsgPackSink {
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
    fn roundtrips_records_across_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.msgpack");

        let writer = open_writer("file", path.to_str().unwrap(), None).unwrap();
        let opts = SinkOptions {
            field_names: None,
            chunk_size: Some(1),
        };
        let mut s = sink(writer, &opts).unwrap();
        for i in 0..3 {
            let mut rec = Record::new();
            rec.insert("n".into(), Value::Int(i));
            s.write(&rec).unwrap();
        }
        s.finish().unwrap();

        let reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let records: Vec<_> = source(reader, &SourceOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1]["n"], Value::Int(1));
    }
}
