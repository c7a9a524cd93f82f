// Logical Query Plan Implementation
//
// This module defines the validated, immutable plan the executor consumes,
// together with the projection, join and sort items it is made of.

use std::fmt;
use std::sync::Arc;

use crate::catalog::entity::{EntityDescriptor, FieldRef};
use crate::catalog::schema::DataType;
use crate::query::executor::result::{QueryError, QueryResult};
use crate::query::predicate::Predicate;

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn sql(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

/// An aggregate over an entity, or over one of its fields
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    function: AggregateFunction,
    entity: String,
    field: Option<FieldRef>,
}

impl Aggregate {
    /// Number of rows of `entity`
    pub fn count(entity: &EntityDescriptor) -> Self {
        Aggregate {
            function: AggregateFunction::Count,
            entity: entity.name().to_string(),
            field: None,
        }
    }

    /// Number of non-null values of `field`
    pub fn count_field(field: FieldRef) -> Self {
        Self::over(AggregateFunction::Count, field)
    }

    pub fn sum(field: FieldRef) -> QueryResult<Self> {
        Self::numeric(AggregateFunction::Sum, field)
    }

    pub fn avg(field: FieldRef) -> QueryResult<Self> {
        Self::numeric(AggregateFunction::Avg, field)
    }

    pub fn min(field: FieldRef) -> QueryResult<Self> {
        Self::ordered(AggregateFunction::Min, field)
    }

    pub fn max(field: FieldRef) -> QueryResult<Self> {
        Self::ordered(AggregateFunction::Max, field)
    }

    fn over(function: AggregateFunction, field: FieldRef) -> Self {
        Aggregate {
            function,
            entity: field.entity().to_string(),
            field: Some(field),
        }
    }

    fn numeric(function: AggregateFunction, field: FieldRef) -> QueryResult<Self> {
        if !field.data_type().is_numeric() {
            return Err(QueryError::TypeMismatch {
                field: field.to_string(),
                expected: "INTEGER or FLOAT".to_string(),
                actual: field.data_type().to_string(),
            });
        }
        Ok(Self::over(function, field))
    }

    fn ordered(function: AggregateFunction, field: FieldRef) -> QueryResult<Self> {
        if field.data_type() == DataType::Reference {
            return Err(QueryError::TypeMismatch {
                field: field.to_string(),
                expected: "a scalar field".to_string(),
                actual: field.data_type().to_string(),
            });
        }
        Ok(Self::over(function, field))
    }

    pub fn function(&self) -> AggregateFunction {
        self.function
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn field(&self) -> Option<&FieldRef> {
        self.field.as_ref()
    }

    /// Type of the value this aggregate yields
    pub fn result_type(&self) -> DataType {
        match (self.function, &self.field) {
            (AggregateFunction::Count, _) | (_, None) => DataType::Integer,
            (AggregateFunction::Avg, _) => DataType::Float,
            (_, Some(field)) => field.data_type(),
        }
    }

    /// Result column label, e.g. `count(*)`, `count(Team.*)` or `sum(age)`.
    /// Entities and fields other than `source` are qualified.
    pub fn label(&self, source: &str) -> String {
        let function = self.function.sql().to_lowercase();
        match &self.field {
            None if self.entity == source => format!("{}(*)", function),
            None => format!("{}({}.*)", function, self.entity),
            Some(field) => format!("{}({})", function, field_label(field, source)),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            None => write!(f, "{}(*)", self.function.sql().to_lowercase()),
            Some(field) => write!(f, "{}({})", self.function.sql().to_lowercase(), field),
        }
    }
}

fn field_label(field: &FieldRef, source: &str) -> String {
    if field.alias().is_none() && field.entity() == source {
        field.field().to_string()
    } else {
        field.to_string()
    }
}

/// One item of a projection list
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionItem {
    /// The whole entity, returned as an entity row
    Entity(String),
    Field(FieldRef),
    Aggregate(Aggregate),
}

impl ProjectionItem {
    pub fn entity(name: impl Into<String>) -> Self {
        ProjectionItem::Entity(name.into())
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, ProjectionItem::Aggregate(_))
    }

    /// Result column label relative to the query's source entity
    pub fn label(&self, source: &str) -> String {
        match self {
            ProjectionItem::Entity(name) => name.clone(),
            ProjectionItem::Field(field) => field_label(field, source),
            ProjectionItem::Aggregate(aggregate) => aggregate.label(source),
        }
    }
}

impl From<FieldRef> for ProjectionItem {
    fn from(field: FieldRef) -> Self {
        ProjectionItem::Field(field)
    }
}

impl From<Aggregate> for ProjectionItem {
    fn from(aggregate: Aggregate) -> Self {
        ProjectionItem::Aggregate(aggregate)
    }
}

impl fmt::Display for ProjectionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionItem::Entity(name) => f.write_str(name),
            ProjectionItem::Field(field) => write!(f, "{}", field),
            ProjectionItem::Aggregate(aggregate) => write!(f, "{}", aggregate),
        }
    }
}

/// Join type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// A join along a reference field, as validated by the planner
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    relation: FieldRef,
    target: Arc<EntityDescriptor>,
    kind: JoinKind,
    fetch: bool,
}

impl JoinClause {
    pub(crate) fn new(relation: FieldRef, target: Arc<EntityDescriptor>, kind: JoinKind, fetch: bool) -> Self {
        JoinClause { relation, target, kind, fetch }
    }

    /// The reference field joined along
    pub fn relation(&self) -> &FieldRef {
        &self.relation
    }

    pub fn target(&self) -> &Arc<EntityDescriptor> {
        &self.target
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    /// Whether the joined entity is materialised on the returned rows
    pub fn is_fetch(&self) -> bool {
        self.fetch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPlacement {
    First,
    Last,
}

/// One ORDER BY key
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    field: FieldRef,
    direction: SortDirection,
    nulls: NullPlacement,
}

impl SortKey {
    /// Ascending, nulls first
    pub fn asc(field: FieldRef) -> Self {
        SortKey {
            field,
            direction: SortDirection::Asc,
            nulls: NullPlacement::First,
        }
    }

    /// Descending, nulls last
    pub fn desc(field: FieldRef) -> Self {
        SortKey {
            field,
            direction: SortDirection::Desc,
            nulls: NullPlacement::Last,
        }
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls = NullPlacement::First;
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullPlacement::Last;
        self
    }

    pub fn field(&self) -> &FieldRef {
        &self.field
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    pub fn nulls(&self) -> NullPlacement {
        self.nulls
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        let nulls = match self.nulls {
            NullPlacement::First => "nulls first",
            NullPlacement::Last => "nulls last",
        };
        write!(f, "{} {} {}", self.field, direction, nulls)
    }
}

/// A validated query, ready for execution. Built only by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub(crate) source: Arc<EntityDescriptor>,
    pub(crate) projection: Vec<ProjectionItem>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) predicate: Option<Predicate>,
    pub(crate) group_by: Vec<FieldRef>,
    pub(crate) sort: Vec<SortKey>,
    pub(crate) offset: u64,
    pub(crate) limit: Option<u64>,
}

impl QueryPlan {
    pub fn source(&self) -> &Arc<EntityDescriptor> {
        &self.source
    }

    pub fn projection(&self) -> &[ProjectionItem] {
        &self.projection
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn group_by(&self) -> &[FieldRef] {
        &self.group_by
    }

    pub fn sort(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Whether the projection contains aggregates
    pub fn is_aggregate(&self) -> bool {
        self.projection.iter().any(ProjectionItem::is_aggregate)
    }

    /// Aggregates without grouping keys collapse into one row
    pub fn is_scalar_aggregate(&self) -> bool {
        self.is_aggregate() && self.group_by.is_empty()
    }

    /// The projected entity when the query returns entity rows
    pub fn projected_entity(&self) -> Option<&Arc<EntityDescriptor>> {
        match self.projection.as_slice() {
            [ProjectionItem::Entity(name)] => self.entity_in_scope(name),
            _ => None,
        }
    }

    /// Source or joined entity with this name
    pub fn entity_in_scope(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        std::iter::once(&self.source)
            .chain(self.joins.iter().map(JoinClause::target))
            .find(|e| e.name() == name)
    }

    /// Result column labels of a tuple projection
    pub fn labels(&self) -> Vec<String> {
        self.projection.iter().map(|p| p.label(self.source.name())).collect()
    }

    /// Copy of this plan returning at most `limit` rows
    pub(crate) fn capped(&self, limit: u64) -> QueryPlan {
        let mut plan = self.clone();
        plan.limit = Some(self.limit.map_or(limit, |l| l.min(limit)));
        plan
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.projection.iter().map(|p| p.to_string()).collect();
        writeln!(f, "Projection: {}", items.join(", "))?;
        if self.limit.is_some() || self.offset > 0 {
            match self.limit {
                Some(limit) => writeln!(f, "  Limit: {} Offset: {}", limit, self.offset)?,
                None => writeln!(f, "  Offset: {}", self.offset)?,
            }
        }
        if !self.sort.is_empty() {
            let keys: Vec<String> = self.sort.iter().map(|k| k.to_string()).collect();
            writeln!(f, "  Sort: {}", keys.join(", "))?;
        }
        if !self.group_by.is_empty() {
            let keys: Vec<String> = self.group_by.iter().map(|k| k.to_string()).collect();
            writeln!(f, "  Group: {}", keys.join(", "))?;
        }
        if let Some(predicate) = &self.predicate {
            writeln!(f, "  Filter: {}", predicate)?;
        }
        for join in self.joins.iter().rev() {
            let kind = match join.kind {
                JoinKind::Inner => "Inner",
                JoinKind::Left => "Left",
            };
            let fetch = if join.fetch { " fetch" } else { "" };
            writeln!(f, "  {}{} Join: {} -> {}", kind, fetch, join.relation, join.target.name())?;
        }
        write!(f, "  Scan: {}", self.source.name())
    }
}
