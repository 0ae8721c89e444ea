//! Line-delimited JSON (JSONL / NDJSON) codec (`spec.md` §4.3).
//!
//! The source reads raw lines and re-batches them: lines are accumulated
//! until the accumulated byte size reaches `chunk_bytes`, then the batch is
//! joined with `,`, wrapped in `[...]`, and parsed as one JSON array. This
//! mirrors the original's one-`json.loads`-per-chunk strategy (rather than
//! one parse call per line) so a very large file is not parsed one
//! allocation at a time.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};

use dk_record::{record_from_json_object, record_to_json_object, Record};
use dk_transport::{TransportRead, TransportWrite};
use serde_json::Value as JsonValue;

use crate::{
    project_for_read, project_for_write, CodecError, RecordResult, RecordIter, Sink, SinkOptions,
    SourceOptions, DEFAULT_JSONL_CHUNK_BYTES,
};

pub fn source(reader: Box<dyn TransportRead>, opts: &SourceOptions) -> Result<RecordIter, CodecError> {
    let chunk_bytes = opts.chunk_size.unwrap_or(DEFAULT_JSONL_CHUNK_BYTES);
    Ok(Box::new(JsonlIter {
        lines: BufReader::new(reader).lines(),
        chunk_bytes,
        field_names: opts.field_names.clone(),
        buffer: VecDeque::new(),
        done: false,
    }))
}

struct JsonlIter {
    lines: std::io::Lines<BufReader<Box<dyn TransportRead>>>,
    chunk_bytes: usize,
    field_names: Option<Vec<String>>,
    buffer: VecDeque<RecordResult>,
    done: bool,
}

impl JsonlIter {
    fn fill_batch(&mut self) {
        let mut raw_lines = Vec::new();
        let mut size = 0usize;
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    size += line.len();
                    raw_lines.push(line);
                    if size >= self.chunk_bytes {
                        break;
                    }
                }
                Some(Err(e)) => {
                    self.buffer.push_back(Err(CodecError::Io(e)));
                    self.done = true;
                    return;
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if raw_lines.is_empty() {
            return;
        }

        let joined = format!("[{}]", raw_lines.join(","));
        match serde_json::from_str::<Vec<JsonValue>>(&joined) {
            Ok(values) => {
                for value in values {
                    let result = match value {
                        JsonValue::Object(obj) => {
                            project_for_read(record_from_json_object(obj), &self.field_names)
                        }
                        other => Err(CodecError::UnsupportedValue(format!(
                            "expected a JSON object per line, found {other}"
                        ))),
                    };
                    self.buffer.push_back(result);
                }
            }
            Err(e) => self.buffer.push_back(Err(CodecError::Json(e))),
        }
    }
}

impl Iterator for JsonlIter {
    type Item = RecordResult;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            self.fill_batch();
        }
    }
}

pub struct JsonlSink {
    writer: Box<dyn TransportWrite>,
    field_names: Option<Vec<String>>,
}

pub fn sink(writer: Box<dyn TransportWrite>, opts: &SinkOptions) -> Result<Box<dyn Sink>, CodecError> {
    Ok(Box::new(JsonlSink {
        writer,
        field_names: opts.field_names.clone(),
    }))
}

impl Sink for JsonlSink {
    fn write(&mut self, record: &Record) -> Result<(), CodecError> {
        let projected = project_for_write(record, &self.field_names)?;
        let obj = record_to_json_object(&projected);
        serde_json::to_writer(&mut self.writer, &JsonValue::Object(obj))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.writer.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_transport::{open_reader, open_writer};

    #[test]
    fn reads_lines_across_a_small_chunk_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n").unwrap();

        let reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let opts = SourceOptions {
            field_names: None,
            chunk_size: Some(1),
        };
        let records: Vec<_> = source(reader, &opts).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["a"], dk_record::Value::Int(3));
    }

    #[test]
    fn sink_writes_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let writer = open_writer("file", path.to_str().unwrap(), None).unwrap();
        let mut s = sink(writer, &SinkOptions::default()).unwrap();
        let mut rec = Record::new();
        rec.insert("x".into(), dk_record::Value::Bool(true));
        s.write(&rec).unwrap();
        s.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"x\":true"));
    }
}
