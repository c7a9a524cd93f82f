// Query Execution Engine Implementation
//
// This module runs validated plans against a store and maps the returned
// columns back onto rows. It also writes records and resolves lazy
// relations.

use log::debug;

use crate::catalog::entity::EntityDescriptor;
use crate::catalog::validation::TypeValidator;
use crate::catalog::SchemaRegistry;
use crate::common::types::EntityId;
use crate::query::executor::record::Record;
use crate::query::executor::result::{
    DataValue, EntityRef, FromRow, QueryError, QueryResult, ResultPage, Row,
};
use crate::query::executor::translate::{self, EntityLayout, RowLayout, TupleColumn};
use crate::query::planner::logical::QueryPlan;
use crate::query::planner::QueryBuilder;
use crate::query::predicate::PredicateBuilder;
use crate::storage::{SqlStatement, Store};

/// Executes plans against a store. Holds no state between calls.
pub struct Executor<'a, S: Store + ?Sized> {
    registry: &'a SchemaRegistry,
    store: &'a S,
}

impl<'a, S: Store + ?Sized> Executor<'a, S> {
    pub fn new(registry: &'a SchemaRegistry, store: &'a S) -> Self {
        Executor { registry, store }
    }

    /// Run a plan and return the requested page with the unpaginated total
    pub fn execute(&self, plan: &QueryPlan) -> QueryResult<ResultPage> {
        let compiled = translate::compile(plan, self.registry)?;
        let rows = self.run(&compiled.select, &compiled.layout)?;

        let total = match &compiled.count {
            Some(count) => self.scalar(count)?,
            None => rows.len() as u64,
        };
        debug!("{} returned {} of {} rows", plan.source().name(), rows.len(), total);

        if plan.is_scalar_aggregate() {
            return Ok(ResultPage::new(rows, total, 0, None));
        }
        Ok(ResultPage::new(rows, total, plan.offset(), plan.limit()))
    }

    /// Run a plan and return its rows, skipping the total count
    pub fn fetch(&self, plan: &QueryPlan) -> QueryResult<Vec<Row>> {
        let compiled = translate::compile(plan, self.registry)?;
        self.run(&compiled.select, &compiled.layout)
    }

    /// Run a plan and map every row onto `T`
    pub fn fetch_as<T: FromRow>(&self, plan: &QueryPlan) -> QueryResult<Vec<T>> {
        self.fetch(plan)?.iter().map(T::from_row).collect()
    }

    /// First row of the result, if any
    pub fn fetch_first(&self, plan: &QueryPlan) -> QueryResult<Option<Row>> {
        Ok(self.fetch(&plan.capped(1))?.into_iter().next())
    }

    /// The only row of the result, if any; `NonUniqueResult` when several match
    pub fn fetch_one(&self, plan: &QueryPlan) -> QueryResult<Option<Row>> {
        let mut rows = self.fetch(&plan.capped(2))?;
        if rows.len() > 1 {
            let total = self.scalar(&translate::count(plan, self.registry)?)?;
            let matched = total
                .saturating_sub(plan.offset())
                .min(plan.limit().unwrap_or(u64::MAX));
            return Err(QueryError::NonUniqueResult(matched as usize));
        }
        Ok(rows.pop())
    }

    /// Load an entity by id
    pub fn find(&self, entity: &str, id: EntityId) -> QueryResult<Option<Row>> {
        let descriptor = self.registry.resolve(entity)?;
        let by_id = PredicateBuilder::new(descriptor.clone()).eq(descriptor.primary_key().name(), id)?;
        let plan = QueryBuilder::select_from(entity).filter(by_id).plan(self.registry)?;
        self.fetch_one(&plan)
    }

    /// The row behind a relation, loading it when it is unresolved
    pub fn resolve(&self, reference: &EntityRef) -> QueryResult<Row> {
        match reference {
            EntityRef::Loaded(row) => Ok((**row).clone()),
            EntityRef::Unresolved { entity, id } => self.find(entity, *id)?.ok_or_else(|| QueryError::EntityNotFound {
                entity: entity.clone(),
                id: *id,
            }),
        }
    }

    /// Insert a record and return its generated id
    pub fn persist(&self, record: &Record) -> QueryResult<EntityId> {
        let descriptor = self.registry.resolve(record.entity())?;
        TypeValidator::validate_record(record.values(), &descriptor, true)?;

        let id = self.store.insert(&translate::insert(&descriptor, record.values())?)?;
        debug!("Persisted {} #{}", descriptor.name(), id);
        Ok(id)
    }

    /// Overwrite the given fields of one entity instance
    pub fn update(&self, id: EntityId, record: &Record) -> QueryResult<()> {
        let descriptor = self.registry.resolve(record.entity())?;
        TypeValidator::validate_record(record.values(), &descriptor, false)?;

        let not_found = || QueryError::EntityNotFound {
            entity: descriptor.name().to_string(),
            id,
        };
        if record.is_empty() {
            return self.find(descriptor.name(), id)?.map(|_| ()).ok_or_else(not_found);
        }

        let affected = self.store.execute(&translate::update(&descriptor, id, record.values())?)?;
        if affected == 0 {
            return Err(not_found());
        }
        debug!("Updated {} #{}", descriptor.name(), id);
        Ok(())
    }

    /// Run hand-written SQL; rows carry the column names the store reports
    pub fn native_query(&self, sql: &str, params: &[DataValue]) -> QueryResult<Vec<Row>> {
        let result = self.store.query(&SqlStatement::new(sql, params.to_vec()))?;
        Ok(result
            .rows
            .into_iter()
            .map(|values| Row::from_values(result.columns.clone(), values))
            .collect())
    }

    fn scalar(&self, statement: &SqlStatement) -> QueryResult<u64> {
        let result = self.store.query(statement)?;
        result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(DataValue::as_integer)
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| QueryError::ExecutionError("Count query returned no value".to_string()))
    }

    fn run(&self, statement: &SqlStatement, layout: &RowLayout) -> QueryResult<Vec<Row>> {
        let result = self.store.query(statement)?;
        let mut rows = Vec::with_capacity(result.rows.len());
        for values in result.rows {
            let row = match layout {
                RowLayout::Entity(entity) => decode_entity(entity, values)?,
                RowLayout::Tuple(columns) => Some(decode_tuple(columns, values)),
            };
            rows.extend(row);
        }
        Ok(rows)
    }
}

fn decode_tuple(columns: &[TupleColumn], values: Vec<DataValue>) -> Row {
    let mut row = Row::new();
    for (column, value) in columns.iter().zip(values) {
        row.set(column.label.clone(), value.coerce(column.data_type));
    }
    row
}

/// Root row with fetched entities attached as loaded relations
fn decode_entity(layout: &EntityLayout, values: Vec<DataValue>) -> QueryResult<Option<Row>> {
    let mut values = values.into_iter();
    let mut entities = Vec::with_capacity(layout.fetched.len() + 1);
    entities.push(read_entity(&layout.root, &mut values)?);
    for fetched in &layout.fetched {
        entities.push(read_entity(&fetched.descriptor, &mut values)?);
    }

    // Children before parents, so nested fetches are complete when attached
    for (i, fetched) in layout.fetched.iter().enumerate().rev() {
        let Some(child) = entities[i + 1].take() else {
            continue;
        };
        if let Some(parent) = entities[fetched.parent].as_mut() {
            parent.set_relation(fetched.relation.clone(), EntityRef::Loaded(Box::new(child)));
        }
    }
    Ok(entities.swap_remove(0))
}

/// One entity's columns; `None` when its key is NULL (unmatched left join)
fn read_entity(
    descriptor: &EntityDescriptor,
    values: &mut impl Iterator<Item = DataValue>,
) -> QueryResult<Option<Row>> {
    let mut fields = Vec::with_capacity(descriptor.fields().len());
    for field in descriptor.fields() {
        let value = values.next().ok_or_else(|| {
            QueryError::ExecutionError(format!("Result row is missing columns of {}", descriptor.name()))
        })?;
        fields.push((field, value.coerce(field.data_type())));
    }

    let id = fields
        .iter()
        .find(|(field, _)| field.is_primary_key())
        .and_then(|(_, value)| value.as_integer());
    let Some(id) = id else {
        return Ok(None);
    };

    let mut row = Row::for_entity(descriptor.name(), id);
    for (field, value) in fields {
        if let (Some(target), Some(target_id)) = (field.target(), value.as_integer()) {
            row.set_relation(
                field.name(),
                EntityRef::Unresolved {
                    entity: target.to_string(),
                    id: target_id,
                },
            );
        }
        row.set(field.name(), value);
    }
    Ok(Some(row))
}
