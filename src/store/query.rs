// Declarative queries — collection, filters, ordering.
//
// Both backends evaluate queries in Rust against decoded documents, so the
// matching rules live here once. Live queries use the same `matches` check
// to decide whether a write added, modified, or removed a record.

use std::cmp::Ordering;

use serde_json::Value;

use super::error::StoreError;
use super::models::Document;

/// A single field predicate. Field names may be dotted paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gt(String, Value),
    Lt(String, Value),
    /// The field is an array containing this value.
    ArrayContains(String, Value),
    /// The field equals one of these values.
    In(String, Vec<Value>),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(f, _)
            | Filter::Gt(f, _)
            | Filter::Lt(f, _)
            | Filter::ArrayContains(f, _)
            | Filter::In(f, _) => f,
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(self.field()) else {
            return false;
        };
        match self {
            Filter::Eq(_, expected) => actual == expected,
            Filter::Gt(_, bound) => compare(actual, bound) == Some(Ordering::Greater),
            Filter::Lt(_, bound) => compare(actual, bound) == Some(Ordering::Less),
            Filter::ArrayContains(_, expected) => actual
                .as_array()
                .is_some_and(|items| items.contains(expected)),
            Filter::In(_, candidates) => candidates.contains(actual),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    /// Only honoured by one-shot reads; live queries reject it.
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    pub fn array_contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::ArrayContains(field.into(), value.into()))
    }

    pub fn where_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Filter::In(field.into(), values))
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject queries no backend can answer.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.collection.is_empty() {
            return Err(StoreError::invalid_query("query has no collection"));
        }
        for filter in &self.filters {
            if filter.field().is_empty() {
                return Err(StoreError::invalid_query("filter has an empty field name"));
            }
            if let Filter::In(field, values) = filter {
                if values.is_empty() {
                    return Err(StoreError::invalid_query(format!(
                        "'in' filter on {field} needs at least one value"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Live queries additionally may not carry a limit.
    pub fn validate_live(&self) -> Result<(), StoreError> {
        self.validate()?;
        if self.limit.is_some() {
            return Err(StoreError::invalid_query(
                "limit is not supported on live queries",
            ));
        }
        Ok(())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.collection == self.collection && self.filters.iter().all(|f| f.matches(doc))
    }

    /// Sort by the requested field (id as tiebreaker), then apply the limit.
    pub fn arrange(&self, docs: &mut Vec<Document>) {
        match &self.order_by {
            Some(order) => docs.sort_by(|a, b| {
                let ord = match (a.get(&order.field), b.get(&order.field)) {
                    (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                let ord = match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                ord.then_with(|| a.id.cmp(&b.id))
            }),
            None => docs.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
    }
}

/// Order two JSON scalars of the same type. Mixed types are incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
