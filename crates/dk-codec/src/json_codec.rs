//! Whole-document JSON codec: a single top-level array of objects
//! (`spec.md` §4.3). For line-delimited JSON see [`crate::jsonl_codec`].

use dk_record::{record_from_json_object, record_to_json_object, Record};
use dk_transport::{TransportRead, TransportWrite};
use serde_json::Value as JsonValue;

use crate::{project_for_read, project_for_write, CodecError, RecordIter, SinkOptions, Sink, SourceOptions};

pub fn source(reader: Box<dyn TransportRead>, opts: &SourceOptions) -> Result<RecordIter, CodecError> {
    let parsed: JsonValue = serde_json::from_reader(reader)?;
    let array = match parsed {
        JsonValue::Array(items) => items,
        other => {
            return Err(CodecError::UnsupportedValue(format!(
                "expected a top-level JSON array, found {}",
                type_name(&other)
            )))
        }
    };

    let field_names = opts.field_names.clone();
    let records: Vec<_> = array
        .into_iter()
        .map(|item| match item {
            JsonValue::Object(obj) => project_for_read(record_from_json_object(obj), &field_names),
            other => Err(CodecError::UnsupportedValue(format!(
                "expected a JSON object record, found {}",
                type_name(&other)
            ))),
        })
        .collect();

    Ok(Box::new(records.into_iter()))
}

fn type_name(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

pub struct JsonSink {
    writer: Box<dyn TransportWrite>,
    field_names: Option<Vec<String>>,
    wrote_any: bool,
}

pub fn sink(mut writer: Box<dyn TransportWrite>, opts: &SinkOptions) -> Result<Box<dyn Sink>, CodecError> {
    use std::io::Write;
    writer.write_all(b"[")?;
    Ok(Box::new(JsonSink {
        writer,
        field_names: opts.field_names.clone(),
        wrote_any: false,
    }))
}

impl Sink for JsonSink {
    fn write(&mut self, record: &Record) -> Result<(), CodecError> {
        use std::io::Write;
        let projected = project_for_write(record, &self.field_names)?;
        if self.wrote_any {
            self.writer.write_all(b",")?;
        }
        let obj = record_to_json_object(&projected);
        serde_json::to_writer(&mut self.writer, &JsonValue::Object(obj))?;
        self.wrote_any = true;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        use std::io::Write;
        self.writer.write_all(b"]")?;
        self.writer.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_transport::{open_reader, open_writer};

    #[test]
    fn round_trips_array_of_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let writer = open_writer("file", path.to_str().unwrap(), None).unwrap();
        let mut s = sink(writer, &SinkOptions::default()).unwrap();
        let mut rec = Record::new();
        rec.insert("a".into(), dk_record::Value::Int(1));
        s.write(&rec).unwrap();
        s.finish().unwrap();

        let reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let records: Vec<_> = source(reader, &SourceOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["a"], dk_record::Value::Int(1));
    }

    #[test]
    fn empty_array_yields_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, "[]").unwrap();
        let reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let records: Vec<_> = source(reader, &SourceOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(records.is_empty());
    }
}
