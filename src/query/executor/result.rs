// Query Result Implementation
//
// This module defines the values, rows, result pages and error type shared by
// the registry, the planner and the executor.

use std::fmt;

use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::schema::DataType;
use crate::common::types::EntityId;

/// A single value read from or written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "'{}'", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl DataValue {
    /// The data type this value carries, `None` for NULL
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            DataValue::Null => None,
            DataValue::Integer(_) => Some(DataType::Integer),
            DataValue::Float(_) => Some(DataType::Float),
            DataValue::Text(_) => Some(DataType::Text),
            DataValue::Boolean(_) => Some(DataType::Boolean),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to floats
    pub fn as_float(&self) -> Option<f64> {
        match self {
            DataValue::Integer(i) => Some(*i as f64),
            DataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Parse a textual value for a field of the given type.
    /// `null` (any case) parses to NULL for every type.
    pub fn parse_as(text: &str, data_type: DataType) -> QueryResult<DataValue> {
        if text.eq_ignore_ascii_case("null") {
            return Ok(DataValue::Null);
        }
        let mismatch = || QueryError::TypeMismatch {
            field: text.to_string(),
            expected: data_type.to_string(),
            actual: "TEXT".to_string(),
        };
        match data_type {
            DataType::Integer | DataType::Reference => {
                text.parse::<i64>().map(DataValue::Integer).map_err(|_| mismatch())
            }
            DataType::Float => text.parse::<f64>().map(DataValue::Float).map_err(|_| mismatch()),
            DataType::Text => Ok(DataValue::Text(text.to_string())),
            DataType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(DataValue::Boolean(true)),
                "false" | "f" | "0" => Ok(DataValue::Boolean(false)),
                _ => Err(mismatch()),
            },
        }
    }

    /// Convert a raw store value into the representation of `data_type`.
    /// SQLite has no boolean storage class, and integers may come back for
    /// REAL columns holding whole numbers.
    pub(crate) fn coerce(self, data_type: DataType) -> DataValue {
        match (self, data_type) {
            (DataValue::Integer(i), DataType::Boolean) => DataValue::Boolean(i != 0),
            (DataValue::Integer(i), DataType::Float) => DataValue::Float(i as f64),
            (value, _) => value,
        }
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Integer(value)
    }
}

impl From<i32> for DataValue {
    fn from(value: i32) -> Self {
        DataValue::Integer(i64::from(value))
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Float(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Boolean(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::Text(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::Text(value)
    }
}

impl<T: Into<DataValue>> From<Option<T>> for DataValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(DataValue::Null, Into::into)
    }
}

/// A related entity on a row.
///
/// A fetch join hands back the related row fully loaded; a plain join (or no
/// join at all) leaves only the foreign key, which `Executor::resolve` turns
/// into a row on demand.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRef {
    Loaded(Box<Row>),
    Unresolved { entity: String, id: EntityId },
}

impl EntityRef {
    pub fn is_loaded(&self) -> bool {
        matches!(self, EntityRef::Loaded(_))
    }

    /// Id of the referenced entity
    pub fn id(&self) -> Option<EntityId> {
        match self {
            EntityRef::Loaded(row) => row.id(),
            EntityRef::Unresolved { id, .. } => Some(*id),
        }
    }

    /// The loaded row, if any
    pub fn loaded(&self) -> Option<&Row> {
        match self {
            EntityRef::Loaded(row) => Some(row),
            EntityRef::Unresolved { .. } => None,
        }
    }
}

/// Represents a row in query results.
///
/// Entity rows carry the entity name, its id and one relation slot per
/// non-null reference field. Tuple rows (field and aggregate projections)
/// only carry values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entity: Option<String>,
    id: Option<EntityId>,
    values: LinkedHashMap<String, DataValue>,
    relations: LinkedHashMap<String, EntityRef>,
}

impl Row {
    /// Create a new empty tuple row
    pub fn new() -> Self {
        Row::default()
    }

    /// Create an empty row for an entity instance
    pub fn for_entity(entity: impl Into<String>, id: EntityId) -> Self {
        Row {
            entity: Some(entity.into()),
            id: Some(id),
            ..Row::default()
        }
    }

    /// Create a row from column values
    pub fn from_values(columns: Vec<String>, values: Vec<DataValue>) -> Self {
        let mut row = Row::new();
        for (col, val) in columns.into_iter().zip(values) {
            row.set(col, val);
        }
        row
    }

    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    /// Get a value by column name
    pub fn get(&self, column: &str) -> Option<&DataValue> {
        self.values.get(column)
    }

    /// Set a value for a column, keeping first-insertion order
    pub fn set(&mut self, column: impl Into<String>, value: DataValue) {
        self.values.insert(column.into(), value);
    }

    /// Column names in order
    pub fn columns(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    /// Values in column order
    pub fn values(&self) -> Vec<&DataValue> {
        self.values.values().collect()
    }

    pub fn relation(&self, name: &str) -> Option<&EntityRef> {
        self.relations.get(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, reference: EntityRef) {
        self.relations.insert(name.into(), reference);
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &EntityRef)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn require(&self, column: &str) -> QueryResult<&DataValue> {
        self.values
            .get(column)
            .ok_or_else(|| QueryError::UnknownField(column.to_string()))
    }

    fn wrong_type(column: &str, expected: DataType, actual: &DataValue) -> QueryError {
        QueryError::TypeMismatch {
            field: column.to_string(),
            expected: expected.to_string(),
            actual: actual
                .data_type()
                .map_or_else(|| "NULL".to_string(), |t| t.to_string()),
        }
    }

    pub fn get_i64(&self, column: &str) -> QueryResult<Option<i64>> {
        match self.require(column)? {
            DataValue::Null => Ok(None),
            DataValue::Integer(i) => Ok(Some(*i)),
            other => Err(Self::wrong_type(column, DataType::Integer, other)),
        }
    }

    pub fn get_f64(&self, column: &str) -> QueryResult<Option<f64>> {
        match self.require(column)? {
            DataValue::Null => Ok(None),
            other => other
                .as_float()
                .map(Some)
                .ok_or_else(|| Self::wrong_type(column, DataType::Float, other)),
        }
    }

    pub fn get_str(&self, column: &str) -> QueryResult<Option<&str>> {
        match self.require(column)? {
            DataValue::Null => Ok(None),
            DataValue::Text(s) => Ok(Some(s)),
            other => Err(Self::wrong_type(column, DataType::Text, other)),
        }
    }

    pub fn get_bool(&self, column: &str) -> QueryResult<Option<bool>> {
        match self.require(column)? {
            DataValue::Null => Ok(None),
            DataValue::Boolean(b) => Ok(Some(*b)),
            other => Err(Self::wrong_type(column, DataType::Boolean, other)),
        }
    }

    /// Map this row onto a typed value
    pub fn decode<T: FromRow>(&self) -> QueryResult<T> {
        T::from_row(self)
    }
}

/// Conversion from a result row into an application type
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> QueryResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> QueryResult<Self> {
        Ok(row.clone())
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPage {
    rows: Vec<Row>,
    /// Number of rows matching the query before pagination
    total: u64,
    offset: u64,
    limit: Option<u64>,
}

impl ResultPage {
    pub fn new(rows: Vec<Row>, total: u64, offset: u64, limit: Option<u64>) -> Self {
        ResultPage { rows, total, offset, limit }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Map every row onto a typed value
    pub fn decode_all<T: FromRow>(&self) -> QueryResult<Vec<T>> {
        self.rows.iter().map(T::from_row).collect()
    }

    /// Format the page as a string table
    pub fn to_string_table(&self) -> String {
        let Some(first) = self.rows.first() else {
            return "Empty result".to_string();
        };

        let mut columns: Vec<String> = first.columns().into_iter().map(String::from).collect();
        for (name, _) in first.relations() {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        }

        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| match (row.relation(col), row.get(col)) {
                        (Some(EntityRef::Loaded(related)), _) => {
                            format!("{}#{}", related.entity().unwrap_or("?"), related.id().unwrap_or_default())
                        }
                        (Some(EntityRef::Unresolved { entity, id }), _) => format!("{}#{} (unresolved)", entity, id),
                        (None, Some(value)) => value.to_string(),
                        (None, None) => "NULL".to_string(),
                    })
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = columns
            .iter()
            .enumerate()
            .map(|(i, col)| cells.iter().map(|r| r[i].len()).max().unwrap_or(0).max(col.len()))
            .collect();

        let mut result = String::new();
        result.push('|');
        for (col, width) in columns.iter().zip(&widths) {
            result.push_str(&format!(" {:<width$} |", col, width = width));
        }
        result.push('\n');
        result.push('|');
        for width in &widths {
            result.push_str(&format!("{}|", "-".repeat(width + 2)));
        }
        result.push('\n');
        for row in &cells {
            result.push('|');
            for (cell, width) in row.iter().zip(&widths) {
                result.push_str(&format!(" {:<width$} |", cell, width = width));
            }
            result.push('\n');
        }
        result.push_str(&format!("({} of {} rows)\n", self.rows.len(), self.total));
        result
    }
}

/// Errors raised while building or running a query
#[derive(Error, Debug)]
pub enum QueryError {
    /// Entity name not present in the registry
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
    /// Field not present on the entity (or entity not part of the query)
    #[error("Unknown field: {0}")]
    UnknownField(String),
    /// Value or field type does not fit the target field
    #[error("Type mismatch on {field}: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },
    /// Entity registered twice
    #[error("Entity already registered: {0}")]
    DuplicateEntity(String),
    /// Aggregate and plain projections mixed without matching grouping keys
    #[error("Invalid aggregation: {0}")]
    InvalidAggregation(String),
    /// Join not reachable from the query or conflicting with another join
    #[error("Invalid join: {0}")]
    InvalidJoin(String),
    /// Projection list cannot be returned as rows
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),
    /// Offset or limit outside the range the store accepts
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),
    /// Malformed entity descriptor
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// Schema file could not be read or parsed
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("NULL value not allowed for non-nullable field {0}")]
    NullValueNotAllowed(String),
    #[error("Missing value for non-nullable field {0}")]
    MissingValue(String),
    /// A single-row fetch matched several rows
    #[error("Expected at most one row, query matched {0}")]
    NonUniqueResult(usize),
    #[error("{entity} with id {id} not found")]
    EntityNotFound { entity: String, id: EntityId },
    /// Diagnostic surfaced by the store
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::ExecutionError(err.to_string())
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::ConfigError(format!("Invalid schema document: {}", err))
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
