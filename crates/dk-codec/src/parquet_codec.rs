//! Parquet codec (`spec.md` §4.3), via `arrow`'s Parquet reader/writer.
//!
//! Unlike the other codecs, Parquet needs direct file access rather than a
//! generic byte stream (the reader seeks, and `arrow-parquet`'s writer wants
//! ownership of its sink), so this module takes a filesystem path rather
//! than a `dk_transport` handle. `spec.md` §4.1 only requires Parquet for
//! the `file` transport, so this is not a loss of generality.
//!
//! Column typing is read directly off the file's embedded Arrow schema, and
//! on write is inferred from the first record's field values. A record
//! whose field values don't match the schema inferred from the first record
//! (e.g. a later record has a string where the first had an int) is
//! rejected with [`CodecError::Parquet`] rather than silently widened —
//! schema evolution belongs to component D, not this codec.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, BooleanArray, Float64Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use dk_record::{Record, Value};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::{project_for_read, project_for_write, CodecError, RecordIter, Sink, SinkOptions, SourceOptions};

fn arrow_value(array: &dyn Array, row: usize, data_type: &DataType) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }
    match data_type {
        DataType::Int64 => Value::Int(array.as_any().downcast_ref::<Int64Array>().unwrap().value(row)),
        DataType::Float64 => Value::Float(
            array
                .as_any()
                .downcast_ref::<Float64Array>()
                .unwrap()
                .value(row),
        ),
        DataType::Boolean => Value::Bool(
            array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .unwrap()
                .value(row),
        ),
        DataType::Utf8 => Value::String(
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap()
                .value(row)
                .to_string(),
        ),
        other => Value::String(format!("<unsupported parquet column type {other:?}>")),
    }
}

pub fn source(path: impl AsRef<Path>, opts: &SourceOptions) -> Result<RecordIter, CodecError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| CodecError::Parquet(format!("failed to open parquet file: {e}")))?;
    let reader = builder
        .build()
        .map_err(|e| CodecError::Parquet(format!("failed to build parquet reader: {e}")))?;

    let field_names = opts.field_names.clone();
    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| CodecError::Parquet(format!("failed to read row group: {e}")))?;
        records.extend(batch_to_records(&batch));
    }

    let records: Vec<_> = records
        .into_iter()
        .map(|r| project_for_read(r, &field_names))
        .collect();
    Ok(Box::new(records.into_iter()))
}

fn batch_to_records(batch: &RecordBatch) -> Vec<Record> {
    let schema = batch.schema();
    (0..batch.num_rows())
        .map(|row| {
            let mut record = Record::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let array = batch.column(col_idx);
                record.insert(field.name().clone(), arrow_value(array.as_ref(), row, field.data_type()));
            }
            record
        })
        .collect()
}

fn value_data_type(v: &Value) -> DataType {
    match v {
        Value::Null => DataType::Utf8,
        Value::Bool(_) => DataType::Boolean,
        Value::Int(_) | Value::UInt(_) => DataType::Int64,
        Value::Float(_) => DataType::Float64,
        Value::Decimal(_) | Value::String(_) | Value::Binary(_) | Value::Date(_) | Value::DateTime(_) | Value::Time(_) => {
            DataType::Utf8
        }
    }
}

fn build_schema(record: &Record) -> Arc<Schema> {
    let fields: Vec<Field> = record
        .iter()
        .map(|(name, value)| Field::new(name, value_data_type(value), true))
        .collect();
    Arc::new(Schema::new(fields))
}

fn build_batch(schema: &Arc<Schema>, records: &[Record]) -> Result<RecordBatch, CodecError> {
    let mut columns: Vec<Arc<dyn Array>> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let column: Arc<dyn Array> = match field.data_type() {
            DataType::Int64 => Arc::new(Int64Array::from(
                records
                    .iter()
                    .map(|r| r.get(field.name()).and_then(Value::as_i64))
                    .collect::<Vec<_>>(),
            )),
            DataType::Float64 => Arc::new(Float64Array::from(
                records
                    .iter()
                    .map(|r| r.get(field.name()).and_then(Value::as_f64))
                    .collect::<Vec<_>>(),
            )),
            DataType::Boolean => Arc::new(BooleanArray::from(
                records
                    .iter()
                    .map(|r| match r.get(field.name()) {
                        Some(Value::Bool(b)) => Some(*b),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            _ => Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.get(field.name()).map(|v| v.to_string()))
                    .collect::<Vec<_>>(),
            )),
        };
        columns.push(column);
    }
    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| CodecError::Parquet(format!("failed to build row group: {e}")))
}

pub struct ParquetSink {
    writer: Option<ArrowWriter<File>>,
    schema: Option<Arc<Schema>>,
    field_names: Option<Vec<String>>,
    batch: Vec<Record>,
    chunk_size: usize,
    path: std::path::PathBuf,
}

pub fn sink(path: impl AsRef<Path>, opts: &SinkOptions) -> Result<Box<dyn Sink>, CodecError> {
    Ok(Box::new(ParquetSink {
        writer: None,
        schema: None,
        field_names: opts.field_names.clone(),
        batch: Vec::new(),
        chunk_size: opts.chunk_size(),
        path: path.as_ref().to_path_buf(),
    }))
}

impl ParquetSink {
    fn ensure_writer(&mut self, first_record: &Record) -> Result<(), CodecError> {
        if self.writer.is_some() {
            return Ok(());
        }
        let schema = build_schema(first_record);
        let file = File::create(&self.path)?;
        let props = WriterProperties::builder().build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .map_err(|e| CodecError::Parquet(format!("failed to open parquet writer: {e}")))?;
        self.schema = Some(schema);
        self.writer = Some(writer);
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<(), CodecError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let schema = self.schema.clone().expect("writer initialized before first flush");
        let record_batch = build_batch(&schema, &self.batch)?;
        self.batch.clear();
        self.writer
            .as_mut()
            .expect("writer initialized before first flush")
            .write(&record_batch)
            .map_err(|e| CodecError::Parquet(format!("failed to write row group: {e}")))?;
        Ok(())
    }
}

impl Sink for ParquetSink {
    fn write(&mut self, record: &Record) -> Result<(), CodecError> {
        let projected = project_for_write(record, &self.field_names)?;
        self.ensure_writer(&projected)?;
        self.batch.push(projected);
        if self.batch.len() >= self.chunk_size {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.flush_batch()?;
        if let Some(writer) = self.writer.take() {
            writer
                .close()
                .map_err(|e| CodecError::Parquet(format!("failed to finalize parquet file: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.parquet");

        let mut s = sink(&path, &SinkOptions::default()).unwrap();
        let mut rec = Record::new();
        rec.insert("id".into(), Value::Int(1));
        rec.insert("name".into(), Value::String("alice".into()));
        s.write(&rec).unwrap();
        let mut rec2 = Record::new();
        rec2.insert("id".into(), Value::Int(2));
        rec2.insert("name".into(), Value::String("bob".into()));
        s.write(&rec2).unwrap();
        s.finish().unwrap();

        let records: Vec<_> = source(&path, &SourceOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], Value::Int(1));
        assert_eq!(records[1]["name"], Value::String("bob".into()));
    }
}
