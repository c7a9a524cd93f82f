// Record Module
//
// Field values to be written for one entity instance.

use linked_hash_map::LinkedHashMap;

use crate::query::executor::result::DataValue;

/// Named values for `Executor::persist` and `Executor::update`.
/// Reference fields take the target's id.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: String,
    values: LinkedHashMap<String, DataValue>,
}

impl Record {
    pub fn new(entity: impl Into<String>) -> Self {
        Record {
            entity: entity.into(),
            values: LinkedHashMap::new(),
        }
    }

    /// Set a field value, replacing any earlier value for the same field
    pub fn set(mut self, field: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn values(&self) -> &LinkedHashMap<String, DataValue> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
