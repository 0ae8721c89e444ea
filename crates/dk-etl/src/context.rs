//! `spec.md` §9 Design Note ("Global configuration and encryption key ...
//! replace with an explicit context value threaded into factories; no
//! process-wide mutable singleton"): `EtlContext` is that explicit value.
//! Callers construct one from `Config` and pass it to the façade
//! functions in this crate rather than reaching for a global.

use std::sync::OnceLock;

use crate::config::Config;

/// Holds the loaded `Config` and lazily materializes the encryption key
/// from it on first access (`spec.md` §3 Connection: "encryption key
/// lifecycle = load on first access, zeroed on teardown"). The key is
/// dropped — and zeroed — with the context.
pub struct EtlContext {
    config: Config,
    encryption_key: OnceLock<Option<dk_model::secret::EncryptionKey>>,
}

impl EtlContext {
    pub fn new(config: Config) -> Self {
        EtlContext {
            config,
            encryption_key: OnceLock::new(),
        }
    }

    pub fn from_env() -> Result<Self, crate::config::ConfigError> {
        Ok(EtlContext::new(Config::load()?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the encryption key, loading it from `config.key` the
    /// first time this is called. `None` if no key is configured.
    pub fn encryption_key(&self) -> Option<&dk_model::secret::EncryptionKey> {
        self.encryption_key
            .get_or_init(|| {
                self.config
                    .key
                    .as_ref()
                    .map(|k| dk_model::secret::EncryptionKey::new(k.clone().into_bytes()))
            })
            .as_ref()
    }
}
