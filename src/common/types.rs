/// Primary key of a persisted entity
pub type EntityId = i64;

/// Alias given to the source entity of a query in generated SQL
pub const SOURCE_ALIAS: &str = "t0";

/// Prefix for aliases of scalar subqueries in generated SQL
pub const SUBQUERY_ALIAS_PREFIX: &str = "s";
