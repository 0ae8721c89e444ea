//! Instance-local ETL services (component M, `spec.md` §4.13): a thin
//! façade composing A–L behind one `anyhow::Error` surface, the way
//! `estuary-flow`'s binaries (`parser`, `config-encryption`) wrap their
//! library crates' typed errors at the edge.
//!
//! No binary lives in this crate: `spec.md` §1 lists "ad-hoc CLI argument
//! wiring" among the peripheral plumbing explicitly out of core scope, so
//! this is a library façade only — a consuming binary elsewhere is
//! expected to call [`init_tracing`], build an [`EtlContext`], and drive
//! [`copy_records`]/[`load_model`]/[`save_model`] itself.

pub mod config;
pub mod context;

use std::path::Path;

pub use config::Config;
pub use context::EtlContext;

pub use dk_codec::{SinkOptions, SourceOptions};
pub use dk_factory::{FactoryError, ScopedSink, ScopedSource};
pub use dk_model::{ModelError, ModelStore};

/// Installs a `tracing-subscriber` formatter honoring `RUST_LOG`,
/// defaulting to `info` — the same pattern `parser`'s and
/// `config-encryption`'s `main.rs` use at process start.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Loads a model document from `path`, decrypting connection passwords
/// with `ctx`'s encryption key if one is configured.
pub fn load_model(ctx: &EtlContext, path: impl AsRef<Path>) -> anyhow::Result<ModelStore> {
    dk_model::ModelStore::load(path.as_ref(), ctx.encryption_key()).map_err(anyhow::Error::from)
}

/// Persists a model document to `path`, encrypting connection passwords
/// with `ctx`'s encryption key if one is configured.
pub fn save_model(ctx: &EtlContext, store: &ModelStore, path: impl AsRef<Path>) -> anyhow::Result<()> {
    store.save(path.as_ref(), ctx.encryption_key()).map_err(anyhow::Error::from)
}

/// Opens `source_uri` and `sink_uri` via the factory (G), streams every
/// record from the former into the latter, and returns the number of
/// records copied. The simplest possible instantiation of the data flow
/// `spec.md` §2 describes: "an endpoint URI → A normalizes it → G
/// selects a transport and codec → records flow ... into a destination."
pub fn copy_records(source_uri: &str, sink_uri: &str) -> anyhow::Result<u64> {
    let source = dk_factory::open_source(source_uri, &SourceOptions::default())?;
    let mut sink = dk_factory::open_sink(sink_uri, &SinkOptions::default())?;
    let mut count = 0u64;
    for record in source {
        let record = record?;
        sink.write(&record)?;
        count += 1;
    }
    sink.finish()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_records_streams_through_factory_source_and_sink() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("in.csv");
        let dst_path = dir.path().join("out.csv");
        std::fs::write(&src_path, "a,b\n1,x\n2,y\n").unwrap();

        let count = copy_records(
            &format!("csv:///{}", src_path.to_str().unwrap()),
            &format!("csv:///{}", dst_path.to_str().unwrap()),
        )
        .unwrap();
        assert_eq!(count, 2);
        let written = std::fs::read_to_string(&dst_path).unwrap();
        assert!(written.contains("1,x"));
        assert!(written.contains("2,y"));
    }

    #[test]
    fn load_and_save_model_round_trip_with_a_context_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.yaml");
        let ctx = EtlContext::new(Config {
            key: Some("test-key".into()),
            default_model_name: None,
        });

        let mut store = ModelStore::new();
        store
            .add_connection(
                "main",
                dk_model::Connection {
                    dialect: "postgresql".into(),
                    driver: "postgresql".into(),
                    database: "mydb".into(),
                    host: None,
                    port: None,
                    username: None,
                    password: Some(dk_model::secret::Secret::new("hunter2".into())),
                    compression: None,
                },
            )
            .unwrap();
        save_model(&ctx, &store, &path).unwrap();

        let loaded = load_model(&ctx, &path).unwrap();
        assert!(loaded.connections.contains_key("main"));
    }
}
