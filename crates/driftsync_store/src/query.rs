//! Filtered, sorted and paginated record queries.
//!
//! A query is a set of field predicates joined by AND, a list of
//! sort keys, and offset/limit pagination. Queries are evaluated against the
//! JSON representation of records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Field equals value.
    Eq,
    /// Field differs from value (missing fields match).
    Ne,
    /// Field is greater than value.
    Gt,
    /// Field is greater than or equal to value.
    Gte,
    /// Field is less than value.
    Lt,
    /// Field is less than or equal to value.
    Lte,
    /// String field contains the value as a substring.
    Contains,
    /// Field is absent or null.
    IsNull,
}

/// A predicate over one top-level field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field name.
    pub field: String,
    /// Comparison.
    pub op: FilterOp,
    /// Right-hand side.
    pub value: Value,
}

impl Filter {
    /// Returns true if `record` satisfies this predicate.
    pub fn matches(&self, record: &Value) -> bool {
        let field = record.get(&self.field).filter(|v| !v.is_null());
        match self.op {
            FilterOp::IsNull => field.is_none(),
            FilterOp::Eq => field == Some(&self.value),
            FilterOp::Ne => field != Some(&self.value),
            FilterOp::Contains => match (field, &self.value) {
                (Some(Value::String(haystack)), Value::String(needle)) => {
                    haystack.contains(needle.as_str())
                }
                _ => false,
            },
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let Some(ordering) = field.and_then(|f| compare_scalars(f, &self.value)) else {
                    return false;
                };
                match self.op {
                    FilterOp::Gt => ordering == Ordering::Greater,
                    FilterOp::Gte => ordering != Ordering::Less,
                    FilterOp::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Field name.
    pub field: String,
    /// Sort descending instead of ascending.
    pub descending: bool,
}

/// A record query: AND-ed filters, sort keys and pagination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Predicates, all of which must hold.
    pub filters: Vec<Filter>,
    /// Sort keys in priority order.
    pub sort: Vec<SortKey>,
    /// Number of matching records to skip.
    pub offset: usize,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates an unfiltered query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Adds an equality predicate.
    #[must_use]
    pub fn where_eq(self, field: impl Into<String>, value: Value) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    /// Adds an ascending sort key.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            descending: false,
        });
        self
    }

    /// Adds a descending sort key.
    #[must_use]
    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            descending: true,
        });
        self
    }

    /// Sets the offset.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `record` satisfies every filter.
    pub fn matches(&self, record: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Filters, sorts and paginates `records`.
    pub fn apply(&self, records: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut matched: Vec<Value> = records.into_iter().filter(|r| self.matches(r)).collect();

        if !self.sort.is_empty() {
            matched.sort_by(|a, b| self.compare(a, b));
        }

        let iter = matched.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for key in &self.sort {
            let ordering = total_order(
                a.get(&key.field).unwrap_or(&Value::Null),
                b.get(&key.field).unwrap_or(&Value::Null),
            );
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Compares two scalars of the same JSON type.
fn compare_scalars(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Orders any two JSON values: null < bool < number < string < other.
fn total_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    compare_scalars(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}
