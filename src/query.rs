//! Builds WHERE conditions from optional filter criteria.
//!
//! Filters arrive as per-field values that are either absent, a single
//! value, or a collection. Each present field contributes exactly one
//! predicate (equality or set membership) and predicates are joined with
//! OR: callers filter by "any of several identifying attributes", not by
//! conjunction. An empty condition list is a caller error at every
//! consumption site, never "match everything".

use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

/// A single filter field: one value or a collection of values.
#[derive(Debug, Clone)]
pub enum FilterValue<T> {
    One(T),
    Many(Vec<T>),
}

/// A value bound into a query placeholder.
#[derive(Debug, Clone)]
pub enum Argument {
    Uuid(Uuid),
    Text(String),
    Bool(bool),
    Int(i64),
}

impl From<Uuid> for Argument {
    fn from(value: Uuid) -> Self {
        Argument::Uuid(value)
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Argument::Text(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Text(value.to_owned())
    }
}

impl From<bool> for Argument {
    fn from(value: bool) -> Self {
        Argument::Bool(value)
    }
}

impl From<i64> for Argument {
    fn from(value: i64) -> Self {
        Argument::Int(value)
    }
}

/// The comparison a condition performs against its column.
#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(Argument),
    AnyOf(Vec<Argument>),
}

/// One atomic comparison contributed by a single present filter field.
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: &'static str,
    pub predicate: Predicate,
}

/// Appends a condition for `column` when the filter field carries a value.
///
/// Absent fields and empty collections contribute nothing; an empty
/// collection never disqualifies branches contributed by other fields.
pub fn push_filter<T>(
    conditions: &mut Vec<Condition>,
    column: &'static str,
    value: Option<&FilterValue<T>>,
) where
    T: Clone + Into<Argument>,
{
    match value {
        None => {}
        Some(FilterValue::One(v)) => conditions.push(Condition {
            column,
            predicate: Predicate::Equals(v.clone().into()),
        }),
        Some(FilterValue::Many(vs)) => {
            if vs.is_empty() {
                return;
            }
            conditions.push(Condition {
                column,
                predicate: Predicate::AnyOf(vs.iter().cloned().map(Into::into).collect()),
            });
        }
    }
}

/// Renders `conditions` into `qb`, OR-joined, values bound as placeholders.
///
/// Callers must have verified the list is non-empty.
pub fn apply_conditions(qb: &mut QueryBuilder<'_, Sqlite>, conditions: &[Condition]) {
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(condition.column);
        match &condition.predicate {
            Predicate::Equals(argument) => {
                qb.push(" = ");
                push_argument(qb, argument);
            }
            Predicate::AnyOf(arguments) => {
                qb.push(" IN (");
                for (j, argument) in arguments.iter().enumerate() {
                    if j > 0 {
                        qb.push(", ");
                    }
                    push_argument(qb, argument);
                }
                qb.push(")");
            }
        }
    }
}

fn push_argument(qb: &mut QueryBuilder<'_, Sqlite>, argument: &Argument) {
    match argument {
        Argument::Uuid(v) => qb.push_bind(*v),
        Argument::Text(v) => qb.push_bind(v.clone()),
        Argument::Bool(v) => qb.push_bind(*v),
        Argument::Int(v) => qb.push_bind(*v),
    };
}
