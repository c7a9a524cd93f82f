// Storage Module
//
// The relational store the executor talks to. Statements arrive as SQL text
// with positional parameters; rows come back as DataValues.

pub mod sqlite;

pub use self::sqlite::{SqliteStore, Transaction, TransactionState};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::types::EntityId;
use crate::query::executor::result::{DataValue, QueryResult};

/// SQL text with positional `?` parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<DataValue>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: Vec<DataValue>) -> Self {
        SqlStatement { sql: sql.into(), params }
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Rows returned by a store, with the column names the statement produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DataValue>>,
}

/// A relational store able to run translated statements
pub trait Store {
    /// Run a query and collect every row
    fn query(&self, statement: &SqlStatement) -> QueryResult<StoreRows>;

    /// Run a statement, returning the number of affected rows
    fn execute(&self, statement: &SqlStatement) -> QueryResult<usize>;

    /// Run an INSERT, returning the generated id
    fn insert(&self, statement: &SqlStatement) -> QueryResult<EntityId>;
}

/// Store connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Database file; `None` keeps everything in memory
    pub path: Option<PathBuf>,
    /// How long a statement waits on a locked database
    pub busy_timeout: Duration,
    /// Enforce REFERENCES constraints
    pub foreign_keys: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: None,
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
        }
    }
}

impl StoreConfig {
    /// File-backed configuration with default settings
    pub fn file(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            path: Some(path.into()),
            ..StoreConfig::default()
        }
    }
}
