//! YAML/JSON persistence for a [`crate::ModelStore`] (`spec.md` §4.6:
//! "the model store is read from and written to a single document").
//!
//! A `Connection`'s password is the one field that can't round-trip
//! through a plain `Serialize` derive — it lives behind [`crate::secret::Secret`]
//! so it never appears unredacted in a `{:?}`. Persistence goes through a
//! small DTO (`ConnectionDto`) that owns the encrypt/decrypt step instead,
//! mirroring the teacher's `config-encryption` crate's separation between
//! the in-memory `Secret<T>` and its on-disk ciphertext form.
//!
//! The document is tagged with a `__meta__.version` key so a future format
//! change can detect and reject documents it doesn't understand, the same
//! versioning discipline `estuary-flow`'s catalog specs use for their own
//! `--build-id`-stamped documents.

use std::fs;
use std::path::Path;

use dk_schema::Entity;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::secret::{self, EncryptionKey, Secret};
use crate::{Connection, Endpoint, ModelError, ModelStore, Query, Relation, Transform};

pub const CURRENT_MODEL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConnectionDto {
    dialect: String,
    driver: String,
    database: String,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    /// Hex ciphertext when a key was supplied, otherwise the plaintext
    /// password (for documents written without an encryption key).
    password: Option<String>,
    #[serde(default)]
    password_encrypted: bool,
    compression: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    #[serde(rename = "__meta__")]
    meta: Meta,
    #[serde(default)]
    connections: IndexMap<String, ConnectionDto>,
    #[serde(default)]
    endpoints: IndexMap<String, Endpoint>,
    #[serde(default)]
    entities: IndexMap<String, Entity>,
    #[serde(default)]
    relations: IndexMap<String, Relation>,
    #[serde(default)]
    queries: IndexMap<String, Query>,
    #[serde(default)]
    transforms: IndexMap<String, Transform>,
}

enum Format {
    Yaml,
    Json,
}

fn format_for(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Format::Json,
        _ => Format::Yaml,
    }
}

impl ModelStore {
    /// Writes this store to `path`, encrypting stored passwords with `key`
    /// when one is given.
    pub fn save(&self, path: &Path, key: Option<&EncryptionKey>) -> Result<(), ModelError> {
        let connections = self
            .connections
            .iter()
            .map(|(name, conn)| (name.clone(), connection_to_dto(conn, key)))
            .collect();

        let document = Document {
            meta: Meta {
                version: CURRENT_MODEL_VERSION,
            },
            connections,
            endpoints: self.endpoints.clone(),
            entities: self.entities.clone(),
            relations: self.relations.clone(),
            queries: self.queries.clone(),
            transforms: self.transforms.clone(),
        };

        let text = match format_for(path) {
            Format::Json => serde_json::to_string_pretty(&document)
                .map_err(|e| ModelError::Deserialize(e.to_string()))?,
            Format::Yaml => {
                serde_yaml::to_string(&document).map_err(|e| ModelError::Deserialize(e.to_string()))?
            }
        };
        fs::write(path, text)?;
        Ok(())
    }

    /// Reads a store from `path`, decrypting stored passwords with `key`
    /// when a password was written as ciphertext.
    pub fn load(path: &Path, key: Option<&EncryptionKey>) -> Result<ModelStore, ModelError> {
        let text = fs::read_to_string(path)?;
        let document: Document = match format_for(path) {
            Format::Json => {
                serde_json::from_str(&text).map_err(|e| ModelError::Deserialize(e.to_string()))?
            }
            Format::Yaml => {
                serde_yaml::from_str(&text).map_err(|e| ModelError::Deserialize(e.to_string()))?
            }
        };

        if document.meta.version > CURRENT_MODEL_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: document.meta.version,
                supported: CURRENT_MODEL_VERSION,
            });
        }

        let mut connections = IndexMap::with_capacity(document.connections.len());
        for (name, dto) in document.connections {
            connections.insert(name, connection_from_dto(dto, key)?);
        }

        Ok(ModelStore {
            connections,
            endpoints: document.endpoints,
            entities: document.entities,
            relations: document.relations,
            queries: document.queries,
            transforms: document.transforms,
        })
    }
}

fn connection_to_dto(conn: &Connection, key: Option<&EncryptionKey>) -> ConnectionDto {
    let (password, password_encrypted) = match (&conn.password, key) {
        (Some(secret), Some(key)) => (Some(secret::encrypt(key, secret.expose_secret())), true),
        (Some(secret), None) => (Some(secret.expose_secret().clone()), false),
        (None, _) => (None, false),
    };
    ConnectionDto {
        dialect: conn.dialect.clone(),
        driver: conn.driver.clone(),
        database: conn.database.clone(),
        host: conn.host.clone(),
        port: conn.port,
        username: conn.username.clone(),
        password,
        password_encrypted,
        compression: conn.compression.clone(),
    }
}

fn connection_from_dto(dto: ConnectionDto, key: Option<&EncryptionKey>) -> Result<Connection, ModelError> {
    let password = match (dto.password, dto.password_encrypted) {
        (Some(cipher), true) => {
            let key = key.ok_or_else(|| ModelError::InvalidCiphertext(cipher.clone()))?;
            Some(Secret::new(secret::decrypt(key, &cipher)?))
        }
        (Some(plain), false) => Some(Secret::new(plain)),
        (None, _) => None,
    };
    Ok(Connection {
        dialect: dto.dialect,
        driver: dto.driver,
        database: dto.database,
        host: dto.host,
        port: dto.port,
        username: dto.username,
        password,
        compression: dto.compression,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_schema::{FieldDescriptor, FieldType};

    fn store_with_connection() -> ModelStore {
        let mut store = ModelStore::new();
        store
            .add_connection(
                "main",
                Connection {
                    dialect: "postgresql".into(),
                    driver: "postgresql".into(),
                    database: "mydb".into(),
                    host: Some("localhost".into()),
                    port: Some(5432),
                    username: Some("admin".into()),
                    password: Some(Secret::new("hunter2".into())),
                    compression: None,
                },
            )
            .unwrap();
        store.add_entity(
            "people",
            Entity::new().with_field("id", FieldDescriptor::new(FieldType::Integer)),
        );
        store
    }

    #[test]
    fn roundtrips_through_yaml_with_encryption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.yaml");
        let key = EncryptionKey::new(b"test-key".to_vec());

        let store = store_with_connection();
        store.save(&path, Some(&key)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("hunter2"), "password must not appear in plaintext on disk");

        let loaded = ModelStore::load(&path, Some(&key)).unwrap();
        let password = loaded.connections["main"].password.as_ref().unwrap();
        assert_eq!(password.expose_secret(), "hunter2");
        assert!(loaded.entities.contains_key("people"));
    }

    #[test]
    fn roundtrips_through_json_without_encryption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let store = store_with_connection();
        store.save(&path, None).unwrap();

        let loaded = ModelStore::load(&path, None).unwrap();
        let password = loaded.connections["main"].password.as_ref().unwrap();
        assert_eq!(password.expose_secret(), "hunter2");
    }

    #[test]
    fn rejects_a_newer_document_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.yaml");
        fs::write(&path, "__meta__:\n  version: 999\n").unwrap();

        let err = ModelStore::load(&path, None).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedVersion { found: 999, .. }));
    }
}
