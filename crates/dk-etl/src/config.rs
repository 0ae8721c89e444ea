//! Process configuration (`spec.md` §7 Configuration file): an INI
//! document with a `DEFAULT` section holding the encryption key and the
//! default model name.
//!
//! Location precedence matches `spec.md` exactly: `~/.dk.ini`, overridden
//! by `./dk.ini`, overridden by an explicit `$DK_CONFIG` path. Parsed
//! with the `ini` crate, the same ambient choice the workspace root
//! `Cargo.toml` carries for this concern (no teacher file parses INI
//! directly; `config-encryption`'s own configuration is environment/CLI
//! driven via `clap`, which is out of scope per this spec's Non-goals on
//! CLI wiring — `ini` is the pack's own declared stack for this).

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse ini document '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub key: Option<String>,
    pub default_model_name: Option<String>,
}

impl Config {
    /// Loads configuration from the highest-precedence location that
    /// exists: `$DK_CONFIG` if set, else `./dk.ini` if present, else
    /// `~/.dk.ini`. Returns an empty `Config` if none of them exist.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(explicit) = std::env::var("DK_CONFIG") {
            return Config::load_file(Path::new(&explicit));
        }
        let local = PathBuf::from("dk.ini");
        if local.exists() {
            return Config::load_file(&local);
        }
        if let Some(home) = dirs::home_dir() {
            let global = home.join(".dk.ini");
            if global.exists() {
                return Config::load_file(&global);
            }
        }
        Ok(Config::default())
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let document = ini::Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let section = document.section(Some("DEFAULT"));
        let key = section.and_then(|s| s.get("key")).map(str::to_string);
        let default_model_name = section
            .and_then(|s| s.get("default_model_name"))
            .map(str::to_string);
        Ok(Config {
            key,
            default_model_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_key_and_default_model_name_from_an_ini_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dk.ini");
        std::fs::write(&path, "[DEFAULT]\nkey = hunter2\ndefault_model_name = warehouse\n").unwrap();
        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.key.as_deref(), Some("hunter2"));
        assert_eq!(config.default_model_name.as_deref(), Some("warehouse"));
    }

    #[test]
    fn defaults_are_empty_when_the_file_has_neither_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dk.ini");
        std::fs::write(&path, "[DEFAULT]\n").unwrap();
        let config = Config::load_file(&path).unwrap();
        assert!(config.key.is_none());
        assert!(config.default_model_name.is_none());
    }
}
