//! Typed filter criteria for finding and removing queue items.
//!
//! Criteria carry an optional set of identifiers plus a list of predicates.
//! Everything is combined with AND; empty criteria match every item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ItemId;

/// A filterable queue item attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Queue,
    Tid,
    Parent,
    Created,
    When,
    Done,
    RetryCount,
}

impl Field {
    /// Column name, quoted where the column is a reserved word.
    pub fn column(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Queue => "queue",
            Field::Tid => "tid",
            Field::Parent => "parent",
            Field::Created => "created",
            Field::When => "\"when\"",
            Field::Done => "done",
            Field::RetryCount => "retry_count",
        }
    }

    /// Can this attribute be absent on a stored item?
    pub fn is_nullable(self) -> bool {
        matches!(
            self,
            Field::Tid | Field::Parent | Field::When | Field::Done
        )
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Field::Name => "name",
            Field::Queue => "queue",
            Field::Tid => "tid",
            Field::Parent => "parent",
            Field::Created => "created",
            Field::When => "when",
            Field::Done => "done",
            Field::RetryCount => "retry_count",
        };
        write!(f, "{s}")
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    pub fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Op::Eq | Op::Ne)
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Id(ItemId),
    Time(DateTime<Utc>),
    Int(i64),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Id(_) => "id",
            Value::Time(_) => "time",
            Value::Int(_) => "int",
        }
    }
}

/// One condition on a queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare { field: Field, op: Op, value: Value },
    IsNull(Field),
    IsNotNull(Field),
    /// Payload contains the given JSON structure (nested object match).
    PayloadContains(serde_json::Value),
}

impl Predicate {
    /// Check that the value type suits the field and the operator suits both.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Predicate::Compare { field, op, value } => {
                let ok = match (field, value) {
                    (Field::Name | Field::Queue | Field::Tid, Value::Text(_)) => true,
                    (Field::Parent, Value::Id(_)) => op.is_equality(),
                    (Field::Created | Field::When | Field::Done, Value::Time(_)) => true,
                    (Field::RetryCount, Value::Int(_)) => true,
                    _ => false,
                };
                if ok {
                    Ok(())
                } else {
                    Err(format!(
                        "cannot compare {field} {} {} value",
                        op.sql(),
                        value.kind()
                    ))
                }
            }
            Predicate::IsNull(field) | Predicate::IsNotNull(field) => {
                if field.is_nullable() {
                    Ok(())
                } else {
                    Err(format!("{field} is never null"))
                }
            }
            Predicate::PayloadContains(json) => {
                if json.is_object() {
                    Ok(())
                } else {
                    Err("payload match must be a JSON object".to_string())
                }
            }
        }
    }
}

/// Filter for [`find`](crate::db::Store::find) and
/// [`remove`](crate::db::Store::remove).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    /// Identifier lookup. `None` means no identifier restriction; an empty
    /// list matches nothing.
    pub ids: Option<Vec<ItemId>>,
    pub predicates: Vec<Predicate>,
}

impl Criteria {
    /// Criteria matching every item.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: ItemId) -> Self {
        Self {
            ids: Some(vec![id]),
            predicates: Vec::new(),
        }
    }

    pub fn by_ids(ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            predicates: Vec::new(),
        }
    }

    /// True when nothing restricts the match, so every item is selected.
    pub fn is_empty(&self) -> bool {
        self.ids.is_none() && self.predicates.is_empty()
    }

    pub fn filter(mut self, field: Field, op: Op, value: Value) -> Self {
        self.predicates.push(Predicate::Compare { field, op, value });
        self
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.filter(Field::Name, Op::Eq, Value::Text(name.into()))
    }

    pub fn queue(self, queue: impl Into<String>) -> Self {
        self.filter(Field::Queue, Op::Eq, Value::Text(queue.into()))
    }

    pub fn tid(self, tid: impl Into<String>) -> Self {
        self.filter(Field::Tid, Op::Eq, Value::Text(tid.into()))
    }

    pub fn parent(self, parent: ItemId) -> Self {
        self.filter(Field::Parent, Op::Eq, Value::Id(parent))
    }

    pub fn retry_count(self, n: i64) -> Self {
        self.filter(Field::RetryCount, Op::Eq, Value::Int(n))
    }

    pub fn created_before(self, t: DateTime<Utc>) -> Self {
        self.filter(Field::Created, Op::Lt, Value::Time(t))
    }

    /// Items not yet claimed.
    pub fn pending(mut self) -> Self {
        self.predicates.push(Predicate::IsNull(Field::Done));
        self
    }

    /// Items already claimed.
    pub fn claimed(mut self) -> Self {
        self.predicates.push(Predicate::IsNotNull(Field::Done));
        self
    }

    pub fn payload_contains(mut self, json: serde_json::Value) -> Self {
        self.predicates.push(Predicate::PayloadContains(json));
        self
    }

    /// Validate every predicate.
    pub fn check(&self) -> Result<(), String> {
        self.predicates.iter().try_for_each(Predicate::check)
    }
}

impl From<ItemId> for Criteria {
    fn from(id: ItemId) -> Self {
        Self::by_id(id)
    }
}
