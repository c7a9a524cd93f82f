// Schema Configuration Module
//
// Loads entity descriptors from a JSON schema document:
//
//   { "entities": [ { "name": "Team", "table": "team", "fields": [ ... ] } ] }

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::entity::EntityDescriptor;
use super::field::FieldDescriptor;
use crate::query::executor::result::{QueryError, QueryResult};

/// Top-level schema document
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    pub entities: Vec<EntityConfig>,
}

/// One entity entry of a schema document
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl SchemaConfig {
    pub fn from_json(json: &str) -> QueryResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> QueryResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| QueryError::ConfigError(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Build descriptors in document order
    pub fn into_descriptors(self) -> QueryResult<Vec<EntityDescriptor>> {
        self.entities
            .into_iter()
            .map(|entity| {
                let descriptor = EntityDescriptor::new(entity.name, entity.fields)?;
                Ok(match entity.table {
                    Some(table) => descriptor.with_table(table),
                    None => descriptor,
                })
            })
            .collect()
    }
}
