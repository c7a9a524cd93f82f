// Query Executor Module
//
// This module is responsible for running query plans against a store and
// turning the returned columns into rows.

pub mod engine;
pub mod record;
pub mod result;
pub mod translate;

// Export key types
pub use self::engine::Executor;
pub use self::record::Record;
pub use self::result::{DataValue, EntityRef, FromRow, QueryError, QueryResult, ResultPage, Row};
