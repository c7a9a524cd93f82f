// Field Descriptor Module
//
// This module defines the FieldDescriptor type describing one entity field.

use serde::{Deserialize, Serialize};

use super::schema::DataType;

/// Describes a single field of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name
    name: String,
    /// Semantic type
    #[serde(rename = "type")]
    data_type: DataType,
    /// Whether the field may hold NULL
    #[serde(default)]
    nullable: bool,
    /// Whether the field is the entity's primary key
    #[serde(default)]
    primary_key: bool,
    /// Target entity of a reference field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
}

impl FieldDescriptor {
    /// Create a plain (non-key, non-reference) field
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        FieldDescriptor {
            name: name.into(),
            data_type,
            nullable,
            primary_key: false,
            target: None,
        }
    }

    /// Create a generated integer primary key
    pub fn id(name: impl Into<String>) -> Self {
        FieldDescriptor {
            name: name.into(),
            data_type: DataType::Integer,
            nullable: false,
            primary_key: true,
            target: None,
        }
    }

    /// Create a many-to-one reference to `target`
    pub fn reference(name: impl Into<String>, target: impl Into<String>, nullable: bool) -> Self {
        FieldDescriptor {
            name: name.into(),
            data_type: DataType::Reference,
            nullable,
            primary_key: false,
            target: Some(target.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_reference(&self) -> bool {
        self.data_type == DataType::Reference
    }

    /// Target entity name of a reference field
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Column backing this field; references store the target id in `<name>_id`
    pub fn column_name(&self) -> String {
        if self.is_reference() {
            format!("{}_id", self.name)
        } else {
            self.name.clone()
        }
    }
}
