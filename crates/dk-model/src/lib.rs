//! The model store (component E): in-memory keyed containers for
//! connections, endpoints, entities, relations, queries, and transforms,
//! backed by a JSON/YAML persistence document.
//!
//! Grounded conceptually on `estuary-flow`'s `models` crate (one keyed
//! container type per catalog concept), though not reused verbatim — the
//! teacher's tables are rows of a Postgres catalog fetched through
//! `agent-sql`, while this store is an in-process map serialized directly
//! to a file, since this spec has no control-plane database.

pub mod persistence;
pub mod secret;
pub mod template;

use std::collections::HashMap;
use std::collections::HashSet;

use dk_schema::Entity;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use secret::Secret;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("a connection named '{0}' already exists")]
    DuplicateConnection(String),
    #[error("a endpoint named '{0}' already exists")]
    DuplicateEndpoint(String),
    #[error("a relation named '{0}' already exists")]
    DuplicateRelation(String),
    #[error("no connection named '{0}'")]
    UnknownConnection(String),
    #[error("no endpoint named '{0}'")]
    UnknownEndpoint(String),
    #[error("no entity named '{0}'")]
    UnknownEntity(String),
    #[error("relation column count mismatch: {constrained} constrained column(s) vs {referred} referred column(s)")]
    RelationColumnMismatch { constrained: usize, referred: usize },
    #[error("relation references unknown column '{column}' on entity '{entity}'")]
    RelationUnknownColumn { entity: String, column: String },
    #[error("invalid ciphertext: '{0}'")]
    InvalidCiphertext(String),
    #[error("model document version {found} is newer than the supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse model document: {0}")]
    Deserialize(String),
    #[error("uri error: {0}")]
    Uri(#[from] dk_uri::UriError),
    #[error("'{0}' is not an endpoint reference (expected '::name')")]
    NotAReference(String),
    #[error("template error: {0}")]
    Template(#[from] template::TemplateError),
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub dialect: String,
    pub driver: String,
    pub database: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    pub compression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub connection: String,
    pub table_name: Option<String>,
    pub entity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub constrained_entity: String,
    pub constrained_columns: Vec<String>,
    pub referred_entity: String,
    pub referred_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub description: String,
}

impl Query {
    /// Render this query's `text` against `vars`, substituting every
    /// `{{ name }}` placeholder. Fails with `ModelError::Template` if any
    /// placeholder names a variable not present in `vars`.
    pub fn render(&self, vars: &HashMap<String, String>) -> Result<String, ModelError> {
        template::render(&self.text, vars).map_err(ModelError::from)
    }
}

/// Ordered mapping from output field name to a small infix expression
/// (`spec.md` §3 Transform). Expression evaluation lives in component F;
/// the model store only owns the declaration.
pub type Transform = IndexMap<String, String>;

/// The in-memory keyed containers (`spec.md` §4.6).
#[derive(Debug, Default)]
pub struct ModelStore {
    pub connections: IndexMap<String, Connection>,
    pub endpoints: IndexMap<String, Endpoint>,
    pub entities: IndexMap<String, Entity>,
    pub relations: IndexMap<String, Relation>,
    pub queries: IndexMap<String, Query>,
    pub transforms: IndexMap<String, Transform>,
}

impl ModelStore {
    pub fn new() -> Self {
        ModelStore::default()
    }

    pub fn add_connection(&mut self, name: impl Into<String>, connection: Connection) -> Result<(), ModelError> {
        let name = name.into();
        if self.connections.contains_key(&name) {
            return Err(ModelError::DuplicateConnection(name));
        }
        self.connections.insert(name, connection);
        Ok(())
    }

    pub fn remove_connection(&mut self, name: &str) -> Option<Connection> {
        self.connections.shift_remove(name)
    }

    pub fn add_endpoint(&mut self, name: impl Into<String>, endpoint: Endpoint) -> Result<(), ModelError> {
        let name = name.into();
        if self.endpoints.contains_key(&name) {
            return Err(ModelError::DuplicateEndpoint(name));
        }
        if !self.connections.contains_key(&endpoint.connection) {
            return Err(ModelError::UnknownConnection(endpoint.connection.clone()));
        }
        self.endpoints.insert(name, endpoint);
        Ok(())
    }

    pub fn remove_endpoint(&mut self, name: &str) -> Option<Endpoint> {
        self.endpoints.shift_remove(name)
    }

    pub fn add_entity(&mut self, name: impl Into<String>, entity: Entity) {
        self.entities.insert(name.into(), entity);
    }

    pub fn remove_entity(&mut self, name: &str) -> Option<Entity> {
        self.entities.shift_remove(name)
    }

    /// Validates column existence on both sides before inserting
    /// (`spec.md` §4.6: "validation hooks on add, e.g. relation column
    /// existence").
    pub fn add_relation(&mut self, name: impl Into<String>, relation: Relation) -> Result<(), ModelError> {
        let name = name.into();
        if self.relations.contains_key(&name) {
            return Err(ModelError::DuplicateRelation(name));
        }
        if relation.constrained_columns.len() != relation.referred_columns.len() {
            return Err(ModelError::RelationColumnMismatch {
                constrained: relation.constrained_columns.len(),
                referred: relation.referred_columns.len(),
            });
        }

        self.assert_columns_exist(&relation.constrained_entity, &relation.constrained_columns)?;
        self.assert_columns_exist(&relation.referred_entity, &relation.referred_columns)?;

        self.relations.insert(name, relation);
        Ok(())
    }

    fn assert_columns_exist(&self, entity_name: &str, columns: &[String]) -> Result<(), ModelError> {
        let entity = self
            .entities
            .get(entity_name)
            .ok_or_else(|| ModelError::UnknownEntity(entity_name.to_string()))?;
        let known: HashSet<&str> = entity.fields.keys().map(String::as_str).collect();
        for col in columns {
            if !known.contains(col.as_str()) {
                return Err(ModelError::RelationUnknownColumn {
                    entity: entity_name.to_string(),
                    column: col.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn add_query(&mut self, name: impl Into<String>, query: Query) {
        self.queries.insert(name.into(), query);
    }

    pub fn add_transform(&mut self, name: impl Into<String>, transform: Transform) {
        self.transforms.insert(name.into(), transform);
    }

    /// Resolves an `::endpoint_name` reference (`spec.md` §4.6) to a
    /// `dk_uri::Endpoint`, with `entity := endpoint.table_name`.
    pub fn resolve_reference(&self, reference: &str) -> Result<dk_uri::Endpoint, ModelError> {
        let name = dk_uri::parse_reference(reference)
            .ok_or_else(|| ModelError::NotAReference(reference.to_string()))?;
        let endpoint = self
            .endpoints
            .get(name)
            .ok_or_else(|| ModelError::UnknownEndpoint(name.to_string()))?;
        let connection = self
            .connections
            .get(&endpoint.connection)
            .ok_or_else(|| ModelError::UnknownConnection(endpoint.connection.clone()))?;

        Ok(dk_uri::Endpoint {
            dialect: connection.dialect.clone(),
            driver: connection.driver.clone(),
            database: connection.database.clone(),
            username: connection.username.clone(),
            password: connection.password.as_ref().map(|s| s.expose_secret().clone()),
            host: connection.host.clone(),
            port: connection.port,
            compression: None,
            entity: endpoint.table_name.clone(),
            filter: None,
        })
    }
}

pub use secret::{decrypt, encrypt};

#[cfg(test)]
mod tests {
    use super::*;
    use dk_schema::{FieldDescriptor, FieldType};

    fn conn() -> Connection {
        Connection {
            dialect: "postgresql".into(),
            driver: "postgresql".into(),
            database: "mydb".into(),
            host: Some("localhost".into()),
            port: Some(5432),
            username: Some("admin".into()),
            password: Some(Secret::new("hunter2".into())),
            compression: None,
        }
    }

    #[test]
    fn rejects_duplicate_connection_name() {
        let mut store = ModelStore::new();
        store.add_connection("main", conn()).unwrap();
        assert!(matches!(
            store.add_connection("main", conn()),
            Err(ModelError::DuplicateConnection(_))
        ));
    }

    #[test]
    fn endpoint_requires_known_connection() {
        let mut store = ModelStore::new();
        let result = store.add_endpoint(
            "people",
            Endpoint {
                connection: "missing".into(),
                table_name: Some("people".into()),
                entity: None,
            },
        );
        assert!(matches!(result, Err(ModelError::UnknownConnection(_))));
    }

    #[test]
    fn relation_validates_column_existence() {
        let mut store = ModelStore::new();
        let entity = Entity::new().with_field("id", FieldDescriptor::new(FieldType::Integer));
        store.add_entity("people", entity.clone());
        store.add_entity("orders", entity);

        let bad = store.add_relation(
            "fk",
            Relation {
                constrained_entity: "orders".into(),
                constrained_columns: vec!["person_id".into()],
                referred_entity: "people".into(),
                referred_columns: vec!["id".into()],
            },
        );
        assert!(matches!(bad, Err(ModelError::RelationUnknownColumn { .. })));
    }

    #[test]
    fn resolves_endpoint_reference() {
        let mut store = ModelStore::new();
        store.add_connection("main", conn()).unwrap();
        store
            .add_endpoint(
                "people",
                Endpoint {
                    connection: "main".into(),
                    table_name: Some("people".into()),
                    entity: None,
                },
            )
            .unwrap();

        let resolved = store.resolve_reference("::people").unwrap();
        assert_eq!(resolved.database, "mydb");
        assert_eq!(resolved.entity, Some("people".to_string()));
    }

    #[test]
    fn query_render_substitutes_and_rejects_undefined_variables() {
        let query = Query {
            text: "select * from t where id = {{ id }}".into(),
            description: "lookup by id".into(),
        };
        assert!(matches!(query.render(&HashMap::new()), Err(ModelError::Template(_))));

        let mut vars = HashMap::new();
        vars.insert("id".to_string(), "5".to_string());
        assert_eq!(query.render(&vars).unwrap(), "select * from t where id = 5");
    }
}
