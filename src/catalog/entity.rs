//! Entity Descriptor Module
//!
//! This module defines the EntityDescriptor type that describes a persisted
//! entity, and FieldRef, the validated handle queries use to point at one of
//! its fields.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::field::FieldDescriptor;
use super::schema::DataType;
use crate::query::executor::result::{QueryError, QueryResult};

/// Describes an entity: its name, backing table and ordered fields
#[derive(Debug, Clone, Serialize)]
pub struct EntityDescriptor {
    /// Entity name
    name: String,
    /// Backing table name
    table: String,
    /// Fields in declaration order
    fields: Vec<FieldDescriptor>,
    /// Field name to index lookup
    #[serde(skip)]
    field_map: HashMap<String, usize>,
    /// Index of the primary key field
    #[serde(skip)]
    primary_key: usize,
}

impl PartialEq for EntityDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.table == other.table && self.fields == other.fields
    }
}

impl EntityDescriptor {
    /// Create a descriptor; the table name defaults to the lower-cased entity name.
    ///
    /// Fails with `InvalidSchema` on duplicate field names, when there is not
    /// exactly one primary key, when the key is not a non-null integer, or
    /// when reference and target do not go together.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> QueryResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(QueryError::InvalidSchema("Entity name must not be empty".to_string()));
        }

        let mut field_map = HashMap::new();
        let mut primary_keys = Vec::new();
        for (i, field) in fields.iter().enumerate() {
            if field_map.insert(field.name().to_string(), i).is_some() {
                return Err(QueryError::InvalidSchema(format!(
                    "Field {} declared twice on {}",
                    field.name(),
                    name
                )));
            }
            if field.is_primary_key() {
                primary_keys.push(i);
            }
            if field.is_reference() != field.target().is_some() {
                return Err(QueryError::InvalidSchema(format!(
                    "Field {}.{} must declare a target exactly when it is a reference",
                    name,
                    field.name()
                )));
            }
        }

        let primary_key = match primary_keys.as_slice() {
            [pk] => *pk,
            [] => return Err(QueryError::InvalidSchema(format!("Entity {} has no primary key", name))),
            _ => {
                return Err(QueryError::InvalidSchema(format!(
                    "Entity {} declares {} primary keys",
                    name,
                    primary_keys.len()
                )));
            }
        };
        let pk = &fields[primary_key];
        if pk.data_type() != DataType::Integer || pk.is_nullable() {
            return Err(QueryError::InvalidSchema(format!(
                "Primary key {}.{} must be a non-null integer",
                name,
                pk.name()
            )));
        }

        Ok(EntityDescriptor {
            table: name.to_lowercase(),
            name,
            fields,
            field_map,
            primary_key,
        })
    }

    /// Override the backing table name
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_map.get(name).map(|&idx| &self.fields[idx])
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_map.contains_key(name)
    }

    pub fn primary_key(&self) -> &FieldDescriptor {
        &self.fields[self.primary_key]
    }

    /// Reference fields in declaration order
    pub fn relations(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    /// Handle on one of this entity's fields, `UnknownField` if absent
    pub fn field_ref(&self, name: &str) -> QueryResult<FieldRef> {
        let field = self
            .field(name)
            .ok_or_else(|| QueryError::UnknownField(format!("{}.{}", self.name, name)))?;
        Ok(FieldRef::new(&self.name, field))
    }

    /// Handle on the primary key
    pub fn id_ref(&self) -> FieldRef {
        FieldRef::new(&self.name, self.primary_key())
    }
}

/// A validated pointer at one field of one entity.
///
/// Only `EntityDescriptor::field_ref` hands these out, so a FieldRef always
/// names a field that existed on the descriptor it came from. The planner
/// still checks that the entity is part of the query being planned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    entity: String,
    /// Query alias the field is reached through, e.g. a subquery's own copy of the entity
    alias: Option<String>,
    field: String,
    column: String,
    data_type: DataType,
    nullable: bool,
    target: Option<String>,
}

impl FieldRef {
    fn new(entity: &str, field: &FieldDescriptor) -> Self {
        FieldRef {
            entity: entity.to_string(),
            alias: None,
            field: field.name().to_string(),
            column: field.column_name(),
            data_type: field.data_type(),
            nullable: field.is_nullable(),
            target: field.target().map(String::from),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Name the field is scoped by in a query: the alias, else the entity name
    pub fn scope(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.entity)
    }

    /// The same field reached through `alias`
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Target entity when this is a reference field
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether this handle still matches `descriptor`'s definition of the field
    pub(crate) fn matches(&self, descriptor: &EntityDescriptor) -> bool {
        descriptor.name() == self.entity
            && descriptor.field(&self.field).is_some_and(|f| {
                f.data_type() == self.data_type && f.column_name() == self.column && f.target() == self.target()
            })
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope(), self.field)
    }
}
