//! SQL source/sink (`spec.md` §4.3), backed by `sqlx`'s database-agnostic
//! `Any` driver.
//!
//! Table and column names are only known at runtime (an `Entity`, component
//! D, describes them), so this module uses `sqlx`'s dynamic query API
//! rather than the `query!`/`query_as!` compile-time-checked macros the
//! teacher's `agent-sql` crate favors for its fixed, known-at-compile-time
//! queries (see `DESIGN.md`).
//!
//! `sqlx` is an async library; the rest of this codec layer is a
//! synchronous `Iterator`, so each blocking call here drives a private
//! single-threaded Tokio runtime with `block_on`. The source eagerly
//! buffers the full result set before returning an iterator over it rather
//! than streaming row-by-row -- a documented simplification, not a
//! correctness gap, since `sqlx::any::AnyRow` borrows from its query
//! execution and does not outlive a simple synchronous iterator adapter.
//!
//! Column values are decoded by trying progressively looser types (`i64`,
//! `f64`, `bool`, `String`) and falling back to SQL `NULL`, since `AnyRow`
//! does not expose a stable `.type_info()` match across every backend.

use dk_record::{Record, Value};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Column, Row};
use tokio::runtime::Runtime;

use crate::{project_for_read, project_for_write, CodecError, RecordIter, Sink, SinkOptions, SourceOptions};

fn runtime() -> Result<Runtime, CodecError> {
    Runtime::new().map_err(CodecError::Io)
}

fn row_to_record(row: &AnyRow) -> Record {
    let mut record = Record::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let idx = column.ordinal();
        let value = if let Ok(v) = row.try_get::<i64, _>(idx) {
            Value::Int(v)
        } else if let Ok(v) = row.try_get::<f64, _>(idx) {
            Value::Float(v)
        } else if let Ok(v) = row.try_get::<bool, _>(idx) {
            Value::Bool(v)
        } else if let Ok(v) = row.try_get::<String, _>(idx) {
            Value::String(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            Value::Binary(v)
        } else {
            Value::Null
        };
        record.insert(name, value);
    }
    record
}

/// Runs `query` against `url` and buffers every row as a [`Record`]. `query`
/// is a complete SQL statement -- table sources render `SELECT * FROM
/// {table}` before calling this, and template sources render their
/// placeholders, upstream of this function.
pub fn source(url: &str, query: &str, opts: &SourceOptions) -> Result<RecordIter, CodecError> {
    sqlx::any::install_default_drivers();
    let rt = runtime()?;
    let rows: Vec<AnyRow> = rt.block_on(async {
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| CodecError::Sql(format!("failed to connect: {e}")))?;
        sqlx::query(query)
            .fetch_all(&pool)
            .await
            .map_err(|e| CodecError::Sql(format!("query failed: {e}")))
    })?;

    let field_names = opts.field_names.clone();
    let records: Vec<_> = rows
        .iter()
        .map(row_to_record)
        .map(|r| project_for_read(r, &field_names))
        .collect();
    Ok(Box::new(records.into_iter()))
}

/// A batching INSERT sink into `table`. Each `flush` runs inside its own
/// transaction; `spec.md` does not require cross-batch atomicity.
pub struct SqlSink {
    url: String,
    table: String,
    field_names: Option<Vec<String>>,
    batch: Vec<Record>,
    chunk_size: usize,
}

pub fn sink(url: &str, table: &str, opts: &SinkOptions) -> Box<dyn Sink> {
    Box::new(SqlSink {
        url: url.to_string(),
        table: table.to_string(),
        field_names: opts.field_names.clone(),
        batch: Vec::new(),
        chunk_size: opts.chunk_size(),
    })
}

impl SqlSink {
    fn flush_batch(&mut self) -> Result<(), CodecError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        sqlx::any::install_default_drivers();
        let rt = runtime()?;
        let table = self.table.clone();
        let url = self.url.clone();
        let batch = std::mem::take(&mut self.batch);
        rt.block_on(async move {
            let pool = AnyPoolOptions::new()
                .max_connections(1)
                .connect(&url)
                .await
                .map_err(|e| CodecError::Sql(format!("failed to connect: {e}")))?;
            let mut tx = pool
                .begin()
                .await
                .map_err(|e| CodecError::Sql(format!("failed to start transaction: {e}")))?;
            for record in &batch {
                let columns: Vec<&str> = record.keys().map(String::as_str).collect();
                let placeholders: Vec<String> = (0..columns.len()).map(|_| "?".to_string()).collect();
                let sql = format!(
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders.join(", ")
                );
                let mut q = sqlx::query(&sql);
                for value in record.values() {
                    q = bind_value(q, value);
                }
                q.execute(&mut *tx)
                    .await
                    .map_err(|e| CodecError::Sql(format!("insert failed: {e}")))?;
            }
            tx.commit()
                .await
                .map_err(|e| CodecError::Sql(format!("commit failed: {e}")))?;
            Ok::<(), CodecError>(())
        })
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => query.bind(*u as i64),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(d) => query.bind(d.to_string()),
        Value::String(s) => query.bind(s.as_str()),
        Value::Binary(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(d.to_string()),
        Value::DateTime(d) => query.bind(d.to_rfc3339()),
        Value::Time(t) => query.bind(t.to_string()),
    }
}

impl Sink for SqlSink {
    fn write(&mut self, record: &Record) -> Result<(), CodecError> {
        let projected = project_for_write(record, &self.field_names)?;
        self.batch.push(projected);
        if self.batch.len() >= self.chunk_size {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.flush_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_and_reads_back_from_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        sqlx::any::install_default_drivers();
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let pool = AnyPoolOptions::new().max_connections(1).connect(&url).await.unwrap();
            sqlx::query("CREATE TABLE people (name TEXT, age INTEGER)")
                .execute(&pool)
                .await
                .unwrap();
        });

        let mut s = sink(&url, "people", &SinkOptions::default());
        let mut rec = Record::new();
        rec.insert("name".into(), Value::String("alice".into()));
        rec.insert("age".into(), Value::Int(30));
        s.write(&rec).unwrap();
        s.finish().unwrap();

        let records: Vec<_> = source(&url, "SELECT name, age FROM people", &SourceOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], Value::String("alice".into()));
    }
}
