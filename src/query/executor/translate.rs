// SQL Translation
//
// Renders validated plans, records and descriptors as SQLite statements.
// Values always travel as positional parameters; identifiers are quoted.

use std::sync::Arc;

use linked_hash_map::LinkedHashMap;

use crate::catalog::entity::{EntityDescriptor, FieldRef};
use crate::catalog::schema::DataType;
use crate::catalog::SchemaRegistry;
use crate::common::types::{EntityId, SOURCE_ALIAS, SUBQUERY_ALIAS_PREFIX};
use crate::query::executor::result::{DataValue, QueryError, QueryResult};
use crate::query::planner::logical::{
    Aggregate, JoinKind, NullPlacement, ProjectionItem, QueryPlan, SortDirection, SortKey,
};
use crate::query::predicate::{Operand, Predicate};
use crate::storage::SqlStatement;

/// An entity loaded through a fetch join
#[derive(Debug, Clone)]
pub struct FetchedEntity {
    /// Index of the owning entity: 0 is the root, `i + 1` is `fetched[i]`
    pub parent: usize,
    /// Reference field on the owner
    pub relation: String,
    pub descriptor: Arc<EntityDescriptor>,
}

#[derive(Debug, Clone)]
pub struct EntityLayout {
    pub root: Arc<EntityDescriptor>,
    pub fetched: Vec<FetchedEntity>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleColumn {
    pub label: String,
    pub data_type: DataType,
}

/// How the columns of a result row map back onto a Row
#[derive(Debug, Clone)]
pub enum RowLayout {
    /// Every field of the root, then every field of each fetched entity
    Entity(EntityLayout),
    /// One column per projection item
    Tuple(Vec<TupleColumn>),
}

/// A plan rendered as SQL
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub select: SqlStatement,
    /// Counts the unpaginated result; absent when the select is not paginated
    pub count: Option<SqlStatement>,
    pub layout: RowLayout,
}

pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Scope name (query alias or entity name) to table alias, innermost scope first
type Aliases = Vec<(String, String)>;

struct SqlWriter {
    params: Vec<DataValue>,
    subqueries: usize,
}

impl SqlWriter {
    fn new() -> Self {
        SqlWriter {
            params: Vec::new(),
            subqueries: 0,
        }
    }

    fn column(&self, field: &FieldRef, aliases: &Aliases) -> QueryResult<String> {
        let (_, alias) = aliases
            .iter()
            .find(|(scope, _)| scope == field.scope())
            .ok_or_else(|| QueryError::UnknownField(field.to_string()))?;
        Ok(format!("{}.{}", quote(alias), quote(field.column())))
    }

    fn aggregate(&self, aggregate: &Aggregate, aliases: &Aliases) -> QueryResult<String> {
        let argument = match aggregate.field() {
            Some(field) => self.column(field, aliases)?,
            None => "*".to_string(),
        };
        Ok(format!("{}({})", aggregate.function().sql(), argument))
    }

    fn bind(&mut self, value: &DataValue) -> &'static str {
        self.params.push(value.clone());
        "?"
    }

    fn predicate(&mut self, predicate: &Predicate, aliases: &Aliases, registry: &SchemaRegistry) -> QueryResult<String> {
        match predicate {
            Predicate::Comparison { field, op, operand } => {
                let column = self.column(field, aliases)?;
                let rhs = match operand {
                    Operand::Value(value) => self.bind(value).to_string(),
                    Operand::Field(other) => self.column(other, aliases)?,
                    Operand::Subquery(subquery) => {
                        self.subqueries += 1;
                        let alias = format!("{}{}", SUBQUERY_ALIAS_PREFIX, self.subqueries);
                        let entity = registry.resolve(subquery.entity())?;

                        let scope = subquery.scope();
                        let mut inner: Aliases = vec![(scope.to_string(), alias.clone())];
                        inner.extend(aliases.iter().filter(|(name, _)| name != scope).cloned());

                        let mut sql = format!(
                            "(SELECT {} FROM {} AS {}",
                            self.aggregate(subquery.aggregate(), &inner)?,
                            quote(entity.table()),
                            quote(&alias)
                        );
                        if let Some(p) = subquery.predicate() {
                            sql.push_str(" WHERE ");
                            sql.push_str(&self.predicate(p, &inner, registry)?);
                        }
                        sql.push(')');
                        sql
                    }
                };
                Ok(format!("{} {} {}", column, op.sql(), rhs))
            }
            Predicate::Range { field, low, high } => {
                let column = self.column(field, aliases)?;
                self.bind(low);
                self.bind(high);
                Ok(format!("{} BETWEEN ? AND ?", column))
            }
            Predicate::IsNull { field, negated } => {
                let column = self.column(field, aliases)?;
                Ok(format!("{} IS {}NULL", column, if *negated { "NOT " } else { "" }))
            }
            Predicate::And(a, b) => Ok(format!(
                "({} AND {})",
                self.predicate(a, aliases, registry)?,
                self.predicate(b, aliases, registry)?
            )),
            Predicate::Or(a, b) => Ok(format!(
                "({} OR {})",
                self.predicate(a, aliases, registry)?,
                self.predicate(b, aliases, registry)?
            )),
            Predicate::Not(p) => Ok(format!("NOT ({})", self.predicate(p, aliases, registry)?)),
        }
    }

    fn sort_key(&self, key: &SortKey, aliases: &Aliases) -> QueryResult<String> {
        let direction = match key.direction() {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let nulls = match key.nulls() {
            NullPlacement::First => "NULLS FIRST",
            NullPlacement::Last => "NULLS LAST",
        };
        Ok(format!("{} {} {}", self.column(key.field(), aliases)?, direction, nulls))
    }
}

fn entity_columns(entity: &EntityDescriptor, alias: &str) -> Vec<String> {
    entity
        .fields()
        .iter()
        .map(|f| format!("{}.{}", quote(alias), quote(&f.column_name())))
        .collect()
}

fn join_alias(index: usize) -> String {
    format!("t{}", index + 1)
}

/// Render a plan as a select statement plus, when paginated, a count
pub fn compile(plan: &QueryPlan, registry: &SchemaRegistry) -> QueryResult<CompiledQuery> {
    let rendered = render(plan, registry)?;
    let paginated = !plan.is_scalar_aggregate() && (plan.limit().is_some() || plan.offset() > 0);
    let count = paginated.then(|| SqlStatement::new(rendered.count, rendered.params.clone()));
    Ok(CompiledQuery {
        select: SqlStatement::new(rendered.select, rendered.params),
        count,
        layout: rendered.layout,
    })
}

/// Number of rows the plan matches before pagination
pub fn count(plan: &QueryPlan, registry: &SchemaRegistry) -> QueryResult<SqlStatement> {
    let rendered = render(plan, registry)?;
    Ok(SqlStatement::new(rendered.count, rendered.params))
}

struct Rendered {
    select: String,
    count: String,
    params: Vec<DataValue>,
    layout: RowLayout,
}

fn render(plan: &QueryPlan, registry: &SchemaRegistry) -> QueryResult<Rendered> {
    let source = plan.source();
    let mut aliases: Aliases = vec![(source.name().to_string(), SOURCE_ALIAS.to_string())];
    for (i, join) in plan.joins().iter().enumerate() {
        aliases.push((join.target().name().to_string(), join_alias(i)));
    }
    let mut writer = SqlWriter::new();

    // FROM ... JOIN ... WHERE ... GROUP BY, shared by the select and the count
    let mut body = format!("FROM {} AS {}", quote(source.table()), quote(SOURCE_ALIAS));
    for (i, join) in plan.joins().iter().enumerate() {
        let target = join.target();
        let alias = join_alias(i);
        let kind = match join.kind() {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        body.push_str(&format!(
            " {} {} AS {} ON {}.{} = {}",
            kind,
            quote(target.table()),
            quote(&alias),
            quote(&alias),
            quote(&target.primary_key().column_name()),
            writer.column(join.relation(), &aliases)?
        ));
    }
    let mut conditions = Vec::new();
    if let Some(predicate) = plan.predicate() {
        conditions.push(writer.predicate(predicate, &aliases, registry)?);
    }
    // A projected joined entity has no row where a left join found no match
    if let Some(projected) = plan.projected_entity().filter(|e| e.name() != source.name()) {
        let alias = aliases
            .iter()
            .find(|(name, _)| name == projected.name())
            .map(|(_, alias)| alias.as_str())
            .unwrap_or(SOURCE_ALIAS);
        conditions.push(format!(
            "{}.{} IS NOT NULL",
            quote(alias),
            quote(&projected.primary_key().column_name())
        ));
    }
    if !conditions.is_empty() {
        body.push_str(" WHERE ");
        body.push_str(&conditions.join(" AND "));
    }
    if !plan.group_by().is_empty() {
        let keys = plan
            .group_by()
            .iter()
            .map(|f| writer.column(f, &aliases))
            .collect::<QueryResult<Vec<_>>>()?;
        body.push_str(" GROUP BY ");
        body.push_str(&keys.join(", "));
    }

    let (columns, layout) = match plan.projected_entity() {
        Some(root) => entity_select(plan, root, &aliases),
        None => tuple_select(plan, &writer, &aliases)?,
    };

    let mut sql = format!("SELECT {} {}", columns.join(", "), body);
    if !plan.sort().is_empty() {
        let keys = plan
            .sort()
            .iter()
            .map(|k| writer.sort_key(k, &aliases))
            .collect::<QueryResult<Vec<_>>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    // A single aggregate row is never paginated
    if !plan.is_scalar_aggregate() && (plan.limit().is_some() || plan.offset() > 0) {
        match plan.limit() {
            Some(limit) => sql.push_str(&format!(" LIMIT {}", limit)),
            None => sql.push_str(" LIMIT -1"),
        }
        if plan.offset() > 0 {
            sql.push_str(&format!(" OFFSET {}", plan.offset()));
        }
    }

    Ok(Rendered {
        select: sql,
        count: format!("SELECT COUNT(*) FROM (SELECT 1 {})", body),
        params: writer.params,
        layout,
    })
}

fn entity_select(plan: &QueryPlan, root: &Arc<EntityDescriptor>, aliases: &Aliases) -> (Vec<String>, RowLayout) {
    let alias_of = |name: &str| {
        aliases
            .iter()
            .find(|(entity, _)| entity == name)
            .map(|(_, alias)| alias.clone())
            .unwrap_or_else(|| SOURCE_ALIAS.to_string())
    };

    let mut columns = entity_columns(root, &alias_of(root.name()));
    let mut owners = vec![root.name().to_string()];
    let mut fetched = Vec::new();
    for (i, join) in plan.joins().iter().enumerate() {
        if !join.is_fetch() {
            continue;
        }
        // The planner guarantees the owner is the root or an earlier fetch
        let parent = owners.iter().position(|o| o == join.relation().entity()).unwrap_or(0);
        columns.extend(entity_columns(join.target(), &join_alias(i)));
        owners.push(join.target().name().to_string());
        fetched.push(FetchedEntity {
            parent,
            relation: join.relation().field().to_string(),
            descriptor: join.target().clone(),
        });
    }

    let layout = RowLayout::Entity(EntityLayout {
        root: root.clone(),
        fetched,
    });
    (columns, layout)
}

fn tuple_select(plan: &QueryPlan, writer: &SqlWriter, aliases: &Aliases) -> QueryResult<(Vec<String>, RowLayout)> {
    let source = plan.source().name();
    let mut columns = Vec::with_capacity(plan.projection().len());
    let mut layout = Vec::with_capacity(plan.projection().len());
    for item in plan.projection() {
        let (column, data_type) = match item {
            ProjectionItem::Field(field) => (writer.column(field, aliases)?, field.data_type()),
            ProjectionItem::Aggregate(aggregate) => (writer.aggregate(aggregate, aliases)?, aggregate.result_type()),
            ProjectionItem::Entity(name) => {
                return Err(QueryError::InvalidProjection(format!(
                    "{} cannot be returned as a column",
                    name
                )));
            }
        };
        columns.push(column);
        layout.push(TupleColumn {
            label: item.label(source),
            data_type,
        });
    }
    Ok((columns, RowLayout::Tuple(layout)))
}

/// CREATE TABLE for an entity; reference targets must be registered
pub fn create_table(entity: &EntityDescriptor, registry: &SchemaRegistry) -> QueryResult<String> {
    let mut columns = Vec::with_capacity(entity.fields().len());
    for field in entity.fields() {
        let mut column = format!("{} {}", quote(&field.column_name()), field.data_type().sql_type());
        if field.is_primary_key() {
            column.push_str(" PRIMARY KEY AUTOINCREMENT");
        } else if !field.is_nullable() {
            column.push_str(" NOT NULL");
        }
        if let Some(target) = field.target() {
            let target = registry.resolve(target)?;
            column.push_str(&format!(
                " REFERENCES {} ({})",
                quote(target.table()),
                quote(&target.primary_key().column_name())
            ));
        }
        columns.push(column);
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(entity.table()),
        columns.join(", ")
    ))
}

fn column_of(entity: &EntityDescriptor, name: &str) -> QueryResult<String> {
    entity
        .field(name)
        .map(|f| quote(&f.column_name()))
        .ok_or_else(|| QueryError::UnknownField(format!("{}.{}", entity.name(), name)))
}

/// INSERT of the given field values
pub fn insert(entity: &EntityDescriptor, values: &LinkedHashMap<String, DataValue>) -> QueryResult<SqlStatement> {
    if values.is_empty() {
        return Ok(SqlStatement::new(
            format!("INSERT INTO {} DEFAULT VALUES", quote(entity.table())),
            Vec::new(),
        ));
    }

    let columns = values
        .keys()
        .map(|name| column_of(entity, name))
        .collect::<QueryResult<Vec<_>>>()?;
    let placeholders = vec!["?"; columns.len()];
    Ok(SqlStatement::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(entity.table()),
            columns.join(", "),
            placeholders.join(", ")
        ),
        values.values().cloned().collect(),
    ))
}

/// UPDATE of the given field values on one row
pub fn update(
    entity: &EntityDescriptor,
    id: EntityId,
    values: &LinkedHashMap<String, DataValue>,
) -> QueryResult<SqlStatement> {
    let assignments = values
        .keys()
        .map(|name| Ok(format!("{} = ?", column_of(entity, name)?)))
        .collect::<QueryResult<Vec<_>>>()?;
    let mut params: Vec<DataValue> = values.values().cloned().collect();
    params.push(DataValue::Integer(id));
    Ok(SqlStatement::new(
        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(entity.table()),
            assignments.join(", "),
            quote(&entity.primary_key().column_name())
        ),
        params,
    ))
}
