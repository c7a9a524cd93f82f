// Query Processing Module
//
// This module contains the typed predicate builder, the query planner and
// the executor.

pub mod executor;
pub mod planner;
pub mod predicate;

// Export key public interfaces
pub use executor::{Executor, QueryError, QueryResult};
pub use planner::{QueryBuilder, QueryPlan, QueryPlanner};
pub use predicate::{Predicate, PredicateBuilder};
