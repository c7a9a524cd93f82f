// Schema Type Module
//
// This module defines the semantic field types known to the registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::query::executor::result::QueryError;

/// Semantic types of entity fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    /// Many-to-one link to another entity, stored as the target's id
    Reference,
}

impl DataType {
    /// Column type used in generated DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Integer | DataType::Boolean | DataType::Reference => "INTEGER",
            DataType::Float => "REAL",
            DataType::Text => "TEXT",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }

    /// Whether a value of type `other` can be compared against this type.
    /// Integers and floats mix; a reference compares against an id.
    pub fn is_comparable_with(&self, other: DataType) -> bool {
        match (self, other) {
            (a, b) if *a == b => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (DataType::Reference, DataType::Integer) | (DataType::Integer, DataType::Reference) => true,
            _ => false,
        }
    }
}

impl FromStr for DataType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INT" | "INTEGER" | "LONG" => Ok(DataType::Integer),
            "FLOAT" | "REAL" | "DOUBLE" => Ok(DataType::Float),
            "TEXT" | "VARCHAR" | "STRING" => Ok(DataType::Text),
            "BOOL" | "BOOLEAN" => Ok(DataType::Boolean),
            "REF" | "REFERENCE" => Ok(DataType::Reference),
            _ => Err(QueryError::InvalidSchema(format!("Unknown data type: {}", s))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::Text => "TEXT",
            DataType::Boolean => "BOOLEAN",
            DataType::Reference => "REFERENCE",
        };
        f.write_str(name)
    }
}
