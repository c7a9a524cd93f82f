// Type Validation Module
//
// This module handles type checking of values against field descriptors,
// both for predicate operands and for records written to the store.

use linked_hash_map::LinkedHashMap;

use crate::catalog::entity::{EntityDescriptor, FieldRef};
use crate::catalog::field::FieldDescriptor;
use crate::catalog::schema::DataType;
use crate::query::executor::result::{DataValue, QueryError, QueryResult};

/// The type validator handles type checking for values and operands
pub struct TypeValidator;

impl TypeValidator {
    /// Validate a value about to be stored in a field
    pub fn validate_value(value: &DataValue, field: &FieldDescriptor) -> QueryResult<()> {
        let Some(actual) = value.data_type() else {
            if field.is_nullable() {
                return Ok(());
            }
            return Err(QueryError::NullValueNotAllowed(field.name().to_string()));
        };

        match (actual, field.data_type()) {
            (a, e) if a == e => Ok(()),
            // Integer can be stored in a Float field
            (DataType::Integer, DataType::Float) => Ok(()),
            // A reference is written as the target's id
            (DataType::Integer, DataType::Reference) => Ok(()),
            (actual, expected) => Err(QueryError::TypeMismatch {
                field: field.name().to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
        }
    }

    /// Validate a set of named values against an entity.
    /// With `complete` set, every non-nullable field other than the primary
    /// key must be present.
    pub fn validate_record(
        values: &LinkedHashMap<String, DataValue>,
        entity: &EntityDescriptor,
        complete: bool,
    ) -> QueryResult<()> {
        for (name, value) in values {
            let field = entity
                .field(name)
                .ok_or_else(|| QueryError::UnknownField(format!("{}.{}", entity.name(), name)))?;
            Self::validate_value(value, field)?;
        }

        if complete {
            for field in entity.fields() {
                if !field.is_primary_key() && !field.is_nullable() && !values.contains_key(field.name()) {
                    return Err(QueryError::MissingValue(format!("{}.{}", entity.name(), field.name())));
                }
            }
        }
        Ok(())
    }

    /// Check that a literal can be compared against a field.
    /// NULL is rejected: null tests go through `is_null`.
    pub fn check_operand(field: &FieldRef, value: &DataValue) -> QueryResult<()> {
        match value.data_type() {
            Some(actual) => Self::check_comparable(field, actual),
            None => Err(QueryError::TypeMismatch {
                field: field.to_string(),
                expected: field.data_type().to_string(),
                actual: "NULL (use is_null)".to_string(),
            }),
        }
    }

    /// Check that a value of type `other` can be compared against a field
    pub fn check_comparable(field: &FieldRef, other: DataType) -> QueryResult<()> {
        if field.data_type().is_comparable_with(other) {
            Ok(())
        } else {
            Err(QueryError::TypeMismatch {
                field: field.to_string(),
                expected: field.data_type().to_string(),
                actual: other.to_string(),
            })
        }
    }

    /// Check that a field supports range comparisons
    pub fn check_ordered(field: &FieldRef) -> QueryResult<()> {
        match field.data_type() {
            DataType::Integer | DataType::Float | DataType::Text => Ok(()),
            other => Err(QueryError::TypeMismatch {
                field: field.to_string(),
                expected: "INTEGER, FLOAT or TEXT".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}
