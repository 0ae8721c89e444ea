//! CSV/TSV codec (`spec.md` §4.3). RFC-4180-like, configurable delimiter;
//! grounded on `parser::format::character_separated`'s separation of
//! "detect a delimiter" from "read records" (we don't auto-detect the
//! delimiter, since `spec.md` only requires it be configurable, not sniffed).

use dk_record::{Record, Value};
use dk_transport::{TransportRead, TransportWrite};

use crate::{project_for_read, project_for_write, CodecError, RecordIter, SinkOptions, SourceOptions};

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub source: SourceOptions,
    pub delimiter: u8,
    /// Lines to discard before the header (or first data row) is read.
    pub skip_lines: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            source: SourceOptions::default(),
            delimiter: b',',
            skip_lines: 0,
        }
    }
}

pub fn source(reader: Box<dyn TransportRead>, opts: &CsvOptions) -> Result<RecordIter, CodecError> {
    let mut buffered = std::io::BufReader::new(reader);
    for _ in 0..opts.skip_lines {
        let mut discard = String::new();
        std::io::BufRead::read_line(&mut buffered, &mut discard)?;
    }

    let has_header_row = opts.source.field_names.is_none();
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(opts.delimiter)
        .has_headers(has_header_row)
        .from_reader(buffered);

    let header: Vec<String> = if has_header_row {
        csv_reader.headers()?.iter().map(str::to_string).collect()
    } else {
        opts.source.field_names.clone().unwrap()
    };

    let field_names = opts.source.field_names.clone();
    let iter = csv_reader.into_records().map(move |row| {
        let row = row?;
        let mut record = Record::new();
        for (name, value) in header.iter().zip(row.iter()) {
            record.insert(name.clone(), Value::String(value.to_string()));
        }
        project_for_read(record, &field_names)
    });

    Ok(Box::new(iter))
}

// csv::Writer takes ownership of the underlying writer; `finish` unwraps it
// via `into_inner` to recover the transport and close it.

pub fn sink(writer: Box<dyn TransportWrite>, opts: &SinkOptions, delimiter: u8) -> Result<Box<dyn crate::Sink>, CodecError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(writer);

    let mut header_written = false;
    if let Some(names) = &opts.field_names {
        csv_writer.write_record(names.iter().map(String::as_str))?;
        csv_writer.flush()?;
        header_written = true;
    }

    Ok(Box::new(CsvSinkInner {
        writer: csv_writer,
        field_names: opts.field_names.clone(),
        header_written,
    }))
}

struct CsvSinkInner {
    writer: csv::Writer<Box<dyn TransportWrite>>,
    field_names: Option<Vec<String>>,
    header_written: bool,
}

impl crate::Sink for CsvSinkInner {
    fn write(&mut self, record: &Record) -> Result<(), CodecError> {
        if !self.header_written {
            let names: Vec<String> = record.keys().cloned().collect();
            self.writer.write_record(names.iter().map(String::as_str))?;
            self.field_names = Some(names);
            self.header_written = true;
        }
        let projected = project_for_write(record, &self.field_names)?;
        self.writer
            .write_record(projected.values().map(|v| v.to_string()))?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.writer.flush()?;
        let mut inner = self
            .writer
            .into_inner()
            .map_err(|e| CodecError::Io(std::io::Error::other(e.to_string())))?;
        inner.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_transport::{open_reader, open_writer};

    #[test]
    fn csv_to_records_default_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "name,age\nalice,30\nbob,40\n").unwrap();

        let reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let records: Vec<_> = source(reader, &CsvOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], Value::String("alice".into()));
        assert_eq!(records[0]["age"], Value::String("30".into()));
        assert_eq!(records[1]["name"], Value::String("bob".into()));
    }

    #[test]
    fn csv_sink_writes_header_for_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let writer = open_writer("file", path.to_str().unwrap(), None).unwrap();
        let opts = SinkOptions {
            field_names: Some(vec!["a".into(), "b".into()]),
            chunk_size: None,
        };
        let sink = sink(writer, &opts, b',').unwrap();
        sink.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim_end(), "a,b");
    }

    #[test]
    fn csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.csv");
        let writer = open_writer("file", path.to_str().unwrap(), None).unwrap();
        let opts = SinkOptions::default();
        let mut s = sink(writer, &opts, b',').unwrap();
        let mut rec = Record::new();
        rec.insert("x".into(), Value::String("1".into()));
        rec.insert("y".into(), Value::String("2".into()));
        s.write(&rec).unwrap();
        s.finish().unwrap();

        let reader = open_reader("file", path.to_str().unwrap(), None).unwrap();
        let records: Vec<_> = source(reader, &CsvOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["x"], Value::String("1".into()));
    }
}
