// Query Planner Module
//
// This module turns a query request into a validated QueryPlan. Every name
// is resolved against the schema registry here, so nothing that reaches the
// executor can refer to an unknown entity or field.

pub mod logical;

// Export key types
pub use self::logical::{
    Aggregate, AggregateFunction, JoinClause, JoinKind, NullPlacement, ProjectionItem, QueryPlan, SortDirection,
    SortKey,
};

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use crate::catalog::entity::{EntityDescriptor, FieldRef};
use crate::catalog::SchemaRegistry;
use crate::query::executor::result::{QueryError, QueryResult};
use crate::query::predicate::{Operand, Predicate};

/// A join the caller asks for
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    /// Reference field on the source or on an earlier joined entity
    pub relation: FieldRef,
    pub kind: JoinKind,
    /// Materialise the joined entity on the returned rows
    pub fetch: bool,
}

/// Everything a query may specify before validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanRequest {
    pub entity: String,
    /// Empty means the source entity
    pub projection: Vec<ProjectionItem>,
    pub predicate: Option<Predicate>,
    pub joins: Vec<JoinRequest>,
    pub group_by: Vec<FieldRef>,
    pub sort: Vec<SortKey>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

/// Entities visible to a query by scope name (alias or entity name), innermost first
type Scope<'s> = [(&'s str, &'s Arc<EntityDescriptor>)];

/// Validates query requests against a registry
pub struct QueryPlanner<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        QueryPlanner { registry }
    }

    /// Validate a request and build the plan
    pub fn plan(&self, request: PlanRequest) -> QueryResult<QueryPlan> {
        let source = self.registry.resolve(&request.entity)?;
        let joins = self.plan_joins(&source, request.joins)?;

        let mut in_scope: Vec<(&str, &Arc<EntityDescriptor>)> = vec![(source.name(), &source)];
        in_scope.extend(joins.iter().map(|j| (j.target().name(), j.target())));

        let projection = if request.projection.is_empty() {
            vec![ProjectionItem::Entity(source.name().to_string())]
        } else {
            request.projection
        };
        self.check_projection(&source, &projection, &in_scope)?;

        if let Some(predicate) = &request.predicate {
            self.check_predicate(predicate, &in_scope)?;
        }
        for key in &request.group_by {
            check_field(key, &in_scope)?;
        }
        for key in &request.sort {
            check_field(key.field(), &in_scope)?;
        }

        check_aggregation(&projection, &request.group_by, &request.sort)?;
        check_fetch_joins(&projection, &joins)?;

        let offset = request.offset.unwrap_or(0);
        check_pagination("offset", offset)?;
        if let Some(limit) = request.limit {
            check_pagination("limit", limit)?;
        }

        let plan = QueryPlan {
            source,
            projection,
            joins,
            predicate: request.predicate,
            group_by: request.group_by,
            sort: request.sort,
            offset,
            limit: request.limit,
        };
        debug!("Planned query:\n{}", plan);
        Ok(plan)
    }

    fn plan_joins(&self, source: &Arc<EntityDescriptor>, requests: Vec<JoinRequest>) -> QueryResult<Vec<JoinClause>> {
        let mut joins: Vec<JoinClause> = Vec::with_capacity(requests.len());
        for request in requests {
            let relation = request.relation;
            let owner = std::iter::once(source)
                .chain(joins.iter().map(JoinClause::target))
                .find(|e| e.name() == relation.scope())
                .ok_or_else(|| {
                    QueryError::InvalidJoin(format!("{} is not reachable from {}", relation, source.name()))
                })?;
            if !relation.matches(owner) {
                return Err(QueryError::UnknownField(relation.to_string()));
            }

            let target_name = relation
                .target()
                .ok_or_else(|| QueryError::InvalidJoin(format!("{} is not a relation", relation)))?;
            let target = self.registry.resolve(target_name)?;

            let already_joined = target.name() == source.name() || joins.iter().any(|j| j.target().name() == target.name());
            if already_joined {
                return Err(QueryError::InvalidJoin(format!(
                    "{} is already part of the query (joined through {})",
                    target.name(),
                    relation
                )));
            }

            joins.push(JoinClause::new(relation, target, request.kind, request.fetch));
        }
        Ok(joins)
    }

    fn check_projection(
        &self,
        source: &Arc<EntityDescriptor>,
        projection: &[ProjectionItem],
        scope: &Scope<'_>,
    ) -> QueryResult<()> {
        let mut labels = HashSet::new();
        for item in projection {
            match item {
                ProjectionItem::Entity(name) => {
                    if projection.len() > 1 {
                        return Err(QueryError::InvalidProjection(format!(
                            "Entity {} cannot be projected together with other items",
                            name
                        )));
                    }
                    if !scope.iter().any(|(scoped, _)| *scoped == name.as_str()) {
                        return Err(QueryError::InvalidProjection(format!("{} is not part of the query", name)));
                    }
                }
                ProjectionItem::Field(field) => check_field(field, scope)?,
                ProjectionItem::Aggregate(aggregate) => {
                    if let Some(field) = aggregate.field() {
                        check_field(field, scope)?;
                    } else if !scope.iter().any(|(scoped, _)| *scoped == aggregate.entity()) {
                        return Err(QueryError::UnknownEntity(aggregate.entity().to_string()));
                    }
                }
            }
            let label = item.label(source.name());
            if !labels.insert(label.clone()) {
                return Err(QueryError::InvalidProjection(format!("Duplicate result column {}", label)));
            }
        }
        Ok(())
    }

    fn check_predicate(&self, predicate: &Predicate, scope: &Scope<'_>) -> QueryResult<()> {
        match predicate {
            Predicate::Comparison { field, operand, .. } => {
                check_field(field, scope)?;
                match operand {
                    Operand::Value(_) => Ok(()),
                    Operand::Field(other) => {
                        check_field(other, scope)?;
                        if other == field {
                            return Err(QueryError::InvalidJoin(format!("{} is compared with itself", field)));
                        }
                        Ok(())
                    }
                    Operand::Subquery(subquery) => {
                        let entity = self.registry.resolve(subquery.entity())?;
                        // The subquery scope shadows an outer scope of the same name
                        let name = subquery.scope();
                        let mut inner: Vec<(&str, &Arc<EntityDescriptor>)> = vec![(name, &entity)];
                        inner.extend(scope.iter().copied().filter(|(scoped, _)| *scoped != name));

                        if let Some(field) = subquery.aggregate().field() {
                            check_field(field, &inner)?;
                        }
                        match subquery.predicate() {
                            Some(p) => self.check_predicate(p, &inner),
                            None => Ok(()),
                        }
                    }
                }
            }
            Predicate::Range { field, .. } | Predicate::IsNull { field, .. } => check_field(field, scope),
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                self.check_predicate(a, scope)?;
                self.check_predicate(b, scope)
            }
            Predicate::Not(p) => self.check_predicate(p, scope),
        }
    }
}

/// A field must belong to an entity in scope, as that entity defines it
fn check_field(field: &FieldRef, scope: &Scope<'_>) -> QueryResult<()> {
    match scope.iter().find(|(scoped, _)| *scoped == field.scope()) {
        Some((_, entity)) if field.matches(entity) => Ok(()),
        _ => Err(QueryError::UnknownField(field.to_string())),
    }
}

fn check_aggregation(projection: &[ProjectionItem], group_by: &[FieldRef], sort: &[SortKey]) -> QueryResult<()> {
    let has_aggregate = projection.iter().any(ProjectionItem::is_aggregate);

    if group_by.is_empty() {
        if !has_aggregate {
            return Ok(());
        }
        if let Some(item) = projection.iter().find(|p| !p.is_aggregate()) {
            return Err(QueryError::InvalidAggregation(format!(
                "{} is mixed with aggregates but there is no grouping key",
                item
            )));
        }
        if let Some(key) = sort.first() {
            return Err(QueryError::InvalidAggregation(format!(
                "Cannot sort a single aggregate row by {}",
                key.field()
            )));
        }
        return Ok(());
    }

    for item in projection {
        match item {
            ProjectionItem::Entity(name) => {
                return Err(QueryError::InvalidAggregation(format!("Cannot group entity rows of {}", name)));
            }
            ProjectionItem::Field(field) if !group_by.contains(field) => {
                return Err(QueryError::InvalidAggregation(format!("{} is not a grouping key", field)));
            }
            _ => {}
        }
    }
    for key in sort {
        if !group_by.contains(key.field()) {
            return Err(QueryError::InvalidAggregation(format!(
                "Sort key {} is not a grouping key",
                key.field()
            )));
        }
    }
    Ok(())
}

/// Fetched entities hang off the projected entity, directly or through
/// earlier fetch joins
fn check_fetch_joins(projection: &[ProjectionItem], joins: &[JoinClause]) -> QueryResult<()> {
    let mut owners: Vec<&str> = Vec::new();
    for join in joins.iter().filter(|j| j.is_fetch()) {
        let projected = match projection {
            [ProjectionItem::Entity(name)] => name.as_str(),
            _ => {
                return Err(QueryError::InvalidJoin(format!(
                    "Fetch join on {} requires an entity projection",
                    join.relation()
                )));
            }
        };
        if owners.is_empty() {
            owners.push(projected);
        }
        if !owners.contains(&join.relation().entity()) {
            return Err(QueryError::InvalidJoin(format!(
                "Fetch join on {} does not start from the projected entity {}",
                join.relation(),
                projected
            )));
        }
        owners.push(join.target().name());
    }
    Ok(())
}

fn check_pagination(name: &str, value: u64) -> QueryResult<()> {
    if value > i64::MAX as u64 {
        return Err(QueryError::InvalidPagination(format!("{} {} exceeds {}", name, value, i64::MAX)));
    }
    Ok(())
}

/// Fluent front end over `PlanRequest`.
///
/// ```ignore
/// let plan = QueryBuilder::select_from("Member")
///     .filter(members.eq("username", "member1")?)
///     .order_by(SortKey::desc(members.field("age")?))
///     .limit(10)
///     .plan(&registry)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    request: PlanRequest,
}

impl QueryBuilder {
    /// Query returning whole `entity` rows
    pub fn select_from(entity: &str) -> Self {
        QueryBuilder {
            request: PlanRequest {
                entity: entity.to_string(),
                ..PlanRequest::default()
            },
        }
    }

    /// Query returning the given projection; follow with `from`
    pub fn select(items: impl IntoIterator<Item = impl Into<ProjectionItem>>) -> Self {
        QueryBuilder {
            request: PlanRequest {
                projection: items.into_iter().map(Into::into).collect(),
                ..PlanRequest::default()
            },
        }
    }

    pub fn from(mut self, entity: &str) -> Self {
        self.request.entity = entity.to_string();
        self
    }

    fn add_join(mut self, relation: FieldRef, kind: JoinKind, fetch: bool) -> Self {
        self.request.joins.push(JoinRequest { relation, kind, fetch });
        self
    }

    /// Inner join along a relation, leaving related rows unresolved
    pub fn join(self, relation: FieldRef) -> Self {
        self.add_join(relation, JoinKind::Inner, false)
    }

    pub fn left_join(self, relation: FieldRef) -> Self {
        self.add_join(relation, JoinKind::Left, false)
    }

    /// Inner join that loads the related entity onto each row
    pub fn fetch_join(self, relation: FieldRef) -> Self {
        self.add_join(relation, JoinKind::Inner, true)
    }

    pub fn left_fetch_join(self, relation: FieldRef) -> Self {
        self.add_join(relation, JoinKind::Left, true)
    }

    /// Add a filter; repeated calls are combined with AND
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.request.predicate = Some(match self.request.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn group_by(mut self, field: FieldRef) -> Self {
        self.request.group_by.push(field);
        self
    }

    pub fn order_by(mut self, key: SortKey) -> Self {
        self.request.sort.push(key);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.request.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.request.limit = Some(limit);
        self
    }

    /// The request built so far
    pub fn request(&self) -> &PlanRequest {
        &self.request
    }

    pub fn into_request(self) -> PlanRequest {
        self.request
    }

    /// Validate against `registry`
    pub fn plan(self, registry: &SchemaRegistry) -> QueryResult<QueryPlan> {
        QueryPlanner::new(registry).plan(self.request)
    }
}
