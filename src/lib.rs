// relq: typed query construction over a relational store

pub mod catalog;
pub mod common;
pub mod query;
pub mod storage;

// Re-export key items for convenient access
pub use catalog::{DataType, EntityDescriptor, FieldDescriptor, FieldRef, SchemaRegistry};
pub use common::types::EntityId;
pub use query::executor::{DataValue, EntityRef, Executor, FromRow, QueryError, QueryResult, Record, ResultPage, Row};
pub use query::planner::{
    Aggregate, JoinKind, PlanRequest, ProjectionItem, QueryBuilder, QueryPlan, QueryPlanner, SortKey,
};
pub use query::predicate::{ComparisonOp, Predicate, PredicateBuilder, ScalarSubquery};
pub use storage::{SqlStatement, SqliteStore, Store, StoreConfig, Transaction};
