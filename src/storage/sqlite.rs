// SQLite Store Implementation
//
// One rusqlite connection behind a mutex. Statements issued through the
// store lock it per call; a Transaction holds the lock until it finishes.
// Waiting for the lock is bounded by the busy timeout, so a statement issued
// through the store while the same thread holds a Transaction fails instead
// of blocking forever.

use log::{debug, info, trace, warn};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};

use super::{SqlStatement, Store, StoreConfig, StoreRows};
use crate::catalog::SchemaRegistry;
use crate::common::types::EntityId;
use crate::query::executor::result::{DataValue, QueryError, QueryResult};
use crate::query::executor::translate;

impl ToSql for DataValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DataValue::Null => ToSqlOutput::Owned(Value::Null),
            DataValue::Integer(i) => ToSqlOutput::from(*i),
            DataValue::Float(f) => ToSqlOutput::from(*f),
            DataValue::Text(s) => ToSqlOutput::from(s.as_str()),
            DataValue::Boolean(b) => ToSqlOutput::from(*b),
        })
    }
}

fn read_value(value: ValueRef<'_>) -> QueryResult<DataValue> {
    match value {
        ValueRef::Null => Ok(DataValue::Null),
        ValueRef::Integer(i) => Ok(DataValue::Integer(i)),
        ValueRef::Real(f) => Ok(DataValue::Float(f)),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .map(|text| DataValue::Text(text.to_string()))
            .map_err(|e| QueryError::ExecutionError(format!("TEXT value is not valid UTF-8: {}", e))),
        ValueRef::Blob(_) => Err(QueryError::ExecutionError("BLOB values are not supported".to_string())),
    }
}

fn log_statement(statement: &SqlStatement) {
    debug!("SQL: {}", statement.sql);
    if !statement.params.is_empty() {
        trace!("Params: {:?}", statement.params);
    }
}

fn run_query(conn: &Connection, statement: &SqlStatement) -> QueryResult<StoreRows> {
    log_statement(statement);
    let mut stmt = conn.prepare(&statement.sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut result = StoreRows {
        columns,
        rows: Vec::new(),
    };
    let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(result.columns.len());
        for i in 0..result.columns.len() {
            values.push(read_value(row.get_ref(i)?)?);
        }
        result.rows.push(values);
    }
    trace!("{} rows", result.rows.len());
    Ok(result)
}

fn run_execute(conn: &Connection, statement: &SqlStatement) -> QueryResult<usize> {
    log_statement(statement);
    Ok(conn.execute(&statement.sql, params_from_iter(statement.params.iter()))?)
}

fn run_insert(conn: &Connection, statement: &SqlStatement) -> QueryResult<EntityId> {
    run_execute(conn, statement)?;
    Ok(conn.last_insert_rowid())
}

/// A store backed by a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl SqliteStore {
    /// Open the database described by `config`
    pub fn open(config: &StoreConfig) -> QueryResult<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout)?;
        if config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }

        match &config.path {
            Some(path) => info!("Opened SQLite store at {}", path.display()),
            None => info!("Opened in-memory SQLite store"),
        }
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            config: config.clone(),
        })
    }

    /// In-memory store with default settings
    pub fn open_in_memory() -> QueryResult<Self> {
        Self::open(&StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn connection(&self) -> QueryResult<MutexGuard<'_, Connection>> {
        self.conn.try_lock_for(self.config.busy_timeout).ok_or_else(|| {
            QueryError::ExecutionError(format!(
                "Connection still busy after {:?}; is a transaction open on this thread?",
                self.config.busy_timeout
            ))
        })
    }

    /// Create a table for every registered entity, in registration order
    pub fn create_schema(&self, registry: &SchemaRegistry) -> QueryResult<()> {
        let conn = self.connection()?;
        for entity in registry.entities() {
            let statement = SqlStatement::new(translate::create_table(&entity, registry)?, Vec::new());
            run_execute(&conn, &statement)?;
            info!("Created table {} for entity {}", entity.table(), entity.name());
        }
        Ok(())
    }

    /// Start a transaction. The connection stays locked until it is
    /// committed, rolled back or dropped, so issue statements through the
    /// returned guard rather than through the store.
    pub fn begin(&self) -> QueryResult<Transaction<'_>> {
        let conn = self.connection()?;
        conn.execute_batch("BEGIN")?;
        debug!("Transaction started");
        Ok(Transaction {
            conn,
            state: TransactionState::Active,
        })
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// `f` must issue its statements through the `Transaction` it is given.
    /// The store itself stays locked until `f` returns, so an `Executor` over
    /// `self` inside `f` fails with `ExecutionError` after the busy timeout.
    pub fn with_transaction<T, F>(&self, f: F) -> QueryResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> QueryResult<T>,
    {
        let tx = self.begin()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Rollback failed after error \"{}\": {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }
}

impl Store for SqliteStore {
    fn query(&self, statement: &SqlStatement) -> QueryResult<StoreRows> {
        run_query(&*self.connection()?, statement)
    }

    fn execute(&self, statement: &SqlStatement) -> QueryResult<usize> {
        run_execute(&*self.connection()?, statement)
    }

    fn insert(&self, statement: &SqlStatement) -> QueryResult<EntityId> {
        run_insert(&*self.connection()?, statement)
    }
}

/// Transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// A scoped transaction on a SqliteStore.
///
/// Dropping an active transaction rolls it back.
pub struct Transaction<'a> {
    conn: MutexGuard<'a, Connection>,
    state: TransactionState,
}

impl Transaction<'_> {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn commit(mut self) -> QueryResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.state = TransactionState::Committed;
        debug!("Transaction committed");
        Ok(())
    }

    pub fn rollback(mut self) -> QueryResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        self.state = TransactionState::RolledBack;
        debug!("Transaction rolled back");
        Ok(())
    }
}

impl Store for Transaction<'_> {
    fn query(&self, statement: &SqlStatement) -> QueryResult<StoreRows> {
        run_query(&self.conn, statement)
    }

    fn execute(&self, statement: &SqlStatement) -> QueryResult<usize> {
        run_execute(&self.conn, statement)
    }

    fn insert(&self, statement: &SqlStatement) -> QueryResult<EntityId> {
        run_insert(&self.conn, statement)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state != TransactionState::Active {
            return;
        }
        warn!("Transaction dropped without commit, rolling back");
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!("Rollback on drop failed: {}", e);
        }
    }
}
