//! Predicate Builder Module
//!
//! Typed filter expressions over entity fields. Every constructor checks the
//! field against the descriptor it was resolved from and the operand type
//! against the field type, so a `Predicate` that exists is well typed.
//! Builders are pure: combining predicates consumes and wraps them, nothing
//! is mutated in place.

use std::fmt;
use std::sync::Arc;

use crate::catalog::entity::{EntityDescriptor, FieldRef};
use crate::catalog::validation::TypeValidator;
use crate::query::executor::result::{DataValue, QueryError, QueryResult};
use crate::query::planner::logical::Aggregate;

/// Binary comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// Whether the operator needs an ordered type
    pub fn is_ordering(&self) -> bool {
        !matches!(self, ComparisonOp::Eq | ComparisonOp::Ne)
    }

    pub fn sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(DataValue),
    Field(FieldRef),
    Subquery(Box<ScalarSubquery>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{}", v),
            Operand::Field(field) => write!(f, "{}", field),
            Operand::Subquery(sub) => write!(f, "({})", sub),
        }
    }
}

/// A single-value subquery: one aggregate over one entity, optionally filtered.
///
/// The subquery entity is scoped by the alias of the aggregated field (or the
/// one set with `alias`), else by its name. Fields in the filter resolve
/// against that scope first and then against the enclosing query. Give the
/// subquery an alias to correlate it with an outer copy of the same entity;
/// without one it shadows the outer entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSubquery {
    aggregate: Aggregate,
    alias: Option<String>,
    predicate: Option<Predicate>,
}

impl ScalarSubquery {
    pub fn new(aggregate: Aggregate) -> Self {
        let alias = aggregate.field().and_then(FieldRef::alias).map(String::from);
        ScalarSubquery {
            aggregate,
            alias,
            predicate: None,
        }
    }

    /// Scope the subquery entity by `alias`
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add a filter; repeated calls are combined with AND
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn entity(&self) -> &str {
        self.aggregate.entity()
    }

    /// Name the subquery entity is scoped by
    pub fn scope(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.entity())
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }
}

impl fmt::Display for ScalarSubquery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select {} from {}", self.aggregate, self.entity())?;
        if let Some(alias) = &self.alias {
            write!(f, " {}", alias)?;
        }
        if let Some(p) = &self.predicate {
            write!(f, " where {}", p)?;
        }
        Ok(())
    }
}

/// A composable boolean condition over entity fields
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        field: FieldRef,
        op: ComparisonOp,
        operand: Operand,
    },
    /// Inclusive range
    Range {
        field: FieldRef,
        low: DataValue,
        high: DataValue,
    },
    IsNull {
        field: FieldRef,
        negated: bool,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

/// Conjunction of two predicates
pub fn and(p1: Predicate, p2: Predicate) -> Predicate {
    p1.and(p2)
}

/// Disjunction of two predicates
pub fn or(p1: Predicate, p2: Predicate) -> Predicate {
    p1.or(p2)
}

/// Conjunction of any number of predicates, `None` when empty
pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
    predicates.into_iter().reduce(Predicate::and)
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Comparison { field, op, operand } => write!(f, "{} {} {}", field, op, operand),
            Predicate::Range { field, low, high } => write!(f, "{} between {} and {}", field, low, high),
            Predicate::IsNull { field, negated: false } => write!(f, "{} is null", field),
            Predicate::IsNull { field, negated: true } => write!(f, "{} is not null", field),
            Predicate::And(a, b) => write!(f, "({} and {})", a, b),
            Predicate::Or(a, b) => write!(f, "({} or {})", a, b),
            Predicate::Not(p) => write!(f, "not ({})", p),
        }
    }
}

/// Builds predicates against one entity descriptor, optionally through an alias
#[derive(Debug, Clone)]
pub struct PredicateBuilder {
    entity: Arc<EntityDescriptor>,
    alias: Option<String>,
}

impl PredicateBuilder {
    pub fn new(entity: Arc<EntityDescriptor>) -> Self {
        PredicateBuilder { entity, alias: None }
    }

    /// Builder whose fields are scoped by `alias`, for subqueries over an
    /// entity the outer query already uses
    pub fn aliased(entity: Arc<EntityDescriptor>, alias: impl Into<String>) -> Self {
        PredicateBuilder {
            entity,
            alias: Some(alias.into()),
        }
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Handle on a field of the bound entity
    pub fn field(&self, name: &str) -> QueryResult<FieldRef> {
        let field = self.entity.field_ref(name)?;
        Ok(match &self.alias {
            Some(alias) => field.aliased(alias.clone()),
            None => field,
        })
    }

    /// `field <op> value`
    pub fn compare(&self, field: &str, op: ComparisonOp, value: impl Into<DataValue>) -> QueryResult<Predicate> {
        let field = self.field(field)?;
        let value = value.into();
        TypeValidator::check_operand(&field, &value)?;
        if op.is_ordering() {
            TypeValidator::check_ordered(&field)?;
        }
        Ok(Predicate::Comparison {
            field,
            op,
            operand: Operand::Value(value),
        })
    }

    pub fn eq(&self, field: &str, value: impl Into<DataValue>) -> QueryResult<Predicate> {
        self.compare(field, ComparisonOp::Eq, value)
    }

    pub fn ne(&self, field: &str, value: impl Into<DataValue>) -> QueryResult<Predicate> {
        self.compare(field, ComparisonOp::Ne, value)
    }

    pub fn lt(&self, field: &str, value: impl Into<DataValue>) -> QueryResult<Predicate> {
        self.compare(field, ComparisonOp::Lt, value)
    }

    pub fn le(&self, field: &str, value: impl Into<DataValue>) -> QueryResult<Predicate> {
        self.compare(field, ComparisonOp::Le, value)
    }

    pub fn gt(&self, field: &str, value: impl Into<DataValue>) -> QueryResult<Predicate> {
        self.compare(field, ComparisonOp::Gt, value)
    }

    pub fn ge(&self, field: &str, value: impl Into<DataValue>) -> QueryResult<Predicate> {
        self.compare(field, ComparisonOp::Ge, value)
    }

    /// `low <= field <= high`
    pub fn between(
        &self,
        field: &str,
        low: impl Into<DataValue>,
        high: impl Into<DataValue>,
    ) -> QueryResult<Predicate> {
        let field = self.field(field)?;
        let (low, high) = (low.into(), high.into());
        TypeValidator::check_ordered(&field)?;
        TypeValidator::check_operand(&field, &low)?;
        TypeValidator::check_operand(&field, &high)?;
        Ok(Predicate::Range { field, low, high })
    }

    pub fn is_null(&self, field: &str) -> QueryResult<Predicate> {
        Ok(Predicate::IsNull {
            field: self.field(field)?,
            negated: false,
        })
    }

    pub fn is_not_null(&self, field: &str) -> QueryResult<Predicate> {
        Ok(Predicate::IsNull {
            field: self.field(field)?,
            negated: true,
        })
    }

    /// `field <op> other`, where `other` may belong to a joined or outer entity
    pub fn compare_field(&self, field: &str, op: ComparisonOp, other: &FieldRef) -> QueryResult<Predicate> {
        let field = self.field(field)?;
        if &field == other {
            return Err(QueryError::InvalidJoin(format!(
                "{} is compared with itself; alias one side to correlate two copies of {}",
                field,
                field.entity()
            )));
        }
        TypeValidator::check_comparable(&field, other.data_type())?;
        if op.is_ordering() {
            TypeValidator::check_ordered(&field)?;
            TypeValidator::check_ordered(other)?;
        }
        Ok(Predicate::Comparison {
            field,
            op,
            operand: Operand::Field(other.clone()),
        })
    }

    /// `field <op> (select <aggregate> from ...)`
    pub fn compare_subquery(&self, field: &str, op: ComparisonOp, subquery: ScalarSubquery) -> QueryResult<Predicate> {
        let field = self.field(field)?;
        TypeValidator::check_comparable(&field, subquery.aggregate().result_type())?;
        if op.is_ordering() {
            TypeValidator::check_ordered(&field)?;
        }
        Ok(Predicate::Comparison {
            field,
            op,
            operand: Operand::Subquery(Box::new(subquery)),
        })
    }

    /// `not predicate`; provided for symmetry with `and`/`or`
    pub fn not(&self, predicate: Predicate) -> Predicate {
        predicate.not()
    }

    pub fn and(&self, p1: Predicate, p2: Predicate) -> Predicate {
        p1.and(p2)
    }

    pub fn or(&self, p1: Predicate, p2: Predicate) -> Predicate {
        p1.or(p2)
    }
}
