//! Catalog Management Module
//!
//! This module holds the schema registry: the typed descriptors of every
//! entity the query layer knows about. Descriptors are registered once at
//! startup and are read-only afterwards.

pub mod config;
pub mod entity;
pub mod field;
pub mod schema;
pub mod validation;

// Re-export key types
pub use self::config::SchemaConfig;
pub use self::entity::{EntityDescriptor, FieldRef};
pub use self::field::FieldDescriptor;
pub use self::schema::DataType;
pub use self::validation::TypeValidator;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::info;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::query::executor::result::{QueryError, QueryResult};
use crate::query::predicate::PredicateBuilder;

// Global registry instance using a thread-safe lazy initialization
static REGISTRY_INSTANCE: Lazy<Arc<SchemaRegistry>> = Lazy::new(|| Arc::new(SchemaRegistry::new()));

#[derive(Default)]
struct RegistryState {
    entities: HashMap<String, Arc<EntityDescriptor>>,
    /// Registration order, used for DDL and listings
    order: Vec<String>,
}

/// The SchemaRegistry is the central repository of entity descriptors
#[derive(Default)]
pub struct SchemaRegistry {
    state: RwLock<RegistryState>,
}

impl SchemaRegistry {
    /// Get the process-wide registry
    pub fn instance() -> Arc<SchemaRegistry> {
        REGISTRY_INSTANCE.clone()
    }

    /// Create a new, empty registry (primarily for testing)
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Register an entity; fails with `DuplicateEntity` if the name is taken
    pub fn register(&self, descriptor: EntityDescriptor) -> QueryResult<Arc<EntityDescriptor>> {
        let mut state = self.state.write();
        if state.entities.contains_key(descriptor.name()) {
            return Err(QueryError::DuplicateEntity(descriptor.name().to_string()));
        }

        info!(
            "Registered entity {} (table {}, {} fields)",
            descriptor.name(),
            descriptor.table(),
            descriptor.fields().len()
        );
        let name = descriptor.name().to_string();
        let descriptor = Arc::new(descriptor);
        state.entities.insert(name.clone(), descriptor.clone());
        state.order.push(name);
        Ok(descriptor)
    }

    /// Register several entities, stopping at the first failure
    pub fn register_all(&self, descriptors: impl IntoIterator<Item = EntityDescriptor>) -> QueryResult<()> {
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(())
    }

    /// Look up an entity by name; fails with `UnknownEntity` if absent
    pub fn resolve(&self, name: &str) -> QueryResult<Arc<EntityDescriptor>> {
        self.state
            .read()
            .entities
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().entities.contains_key(name)
    }

    /// All descriptors in registration order
    pub fn entities(&self) -> Vec<Arc<EntityDescriptor>> {
        let state = self.state.read();
        state.order.iter().filter_map(|name| state.entities.get(name).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every reference field points at a registered entity
    pub fn validate_relations(&self) -> QueryResult<()> {
        let state = self.state.read();
        for descriptor in state.entities.values() {
            for relation in descriptor.relations() {
                let target = relation.target().unwrap_or_default();
                if !state.entities.contains_key(target) {
                    return Err(QueryError::UnknownEntity(format!(
                        "{} (target of {}.{})",
                        target,
                        descriptor.name(),
                        relation.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Register every entity of a JSON schema document
    pub fn load_json(&self, json: &str) -> QueryResult<()> {
        self.load_config(SchemaConfig::from_json(json)?)
    }

    /// Register every entity of a JSON schema file
    pub fn load_file(&self, path: impl AsRef<Path>) -> QueryResult<()> {
        self.load_config(SchemaConfig::from_file(path)?)
    }

    fn load_config(&self, config: SchemaConfig) -> QueryResult<()> {
        self.register_all(config.into_descriptors()?)?;
        self.validate_relations()
    }

    /// Predicate builder bound to a registered entity
    pub fn predicates(&self, entity: &str) -> QueryResult<PredicateBuilder> {
        Ok(PredicateBuilder::new(self.resolve(entity)?))
    }

    /// Predicate builder over a registered entity scoped by `alias`
    pub fn aliased_predicates(&self, entity: &str, alias: &str) -> QueryResult<PredicateBuilder> {
        Ok(PredicateBuilder::aliased(self.resolve(entity)?, alias))
    }
}
