//! Filter predicates shared between the local mirror and the remote query.
//!
//! The offline read path must apply the same semantics the remote query
//! would, so the filter model is defined once: equality, membership,
//! range, ordering and limit.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction for query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

/// A filter over rows of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// field = value
    pub eq: Vec<(String, Value)>,
    /// field IN (values)
    pub is_in: Vec<(String, Vec<Value>)>,
    /// field >= value
    pub gte: Vec<(String, Value)>,
    /// field <= value
    pub lte: Vec<(String, Value)>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    /// An unfiltered query (all rows).
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds an equality predicate.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.push((field.into(), value.into()));
        self
    }

    /// Adds a membership predicate.
    #[must_use]
    pub fn within(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.is_in.push((field.into(), values));
        self
    }

    /// Adds a lower-bound predicate.
    #[must_use]
    pub fn gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.gte.push((field.into(), value.into()));
        self
    }

    /// Adds an upper-bound predicate.
    #[must_use]
    pub fn lte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.lte.push((field.into(), value.into()));
        self
    }

    /// Sorts results ascending by `field`.
    #[must_use]
    pub fn order_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy { field: field.into(), ascending: true });
        self
    }

    /// Sorts results descending by `field`.
    #[must_use]
    pub fn order_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy { field: field.into(), ascending: false });
        self
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Whether a row satisfies every predicate.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        for (field, expected) in &self.eq {
            if !values_equal(row.get(field).unwrap_or(&Value::Null), expected) {
                return false;
            }
        }
        for (field, allowed) in &self.is_in {
            let actual = row.get(field).unwrap_or(&Value::Null);
            if !allowed.iter().any(|v| values_equal(actual, v)) {
                return false;
            }
        }
        for (field, bound) in &self.gte {
            match compare_values(row.get(field).unwrap_or(&Value::Null), bound) {
                Some(Ordering::Greater | Ordering::Equal) => {}
                _ => return false,
            }
        }
        for (field, bound) in &self.lte {
            match compare_values(row.get(field).unwrap_or(&Value::Null), bound) {
                Some(Ordering::Less | Ordering::Equal) => {}
                _ => return false,
            }
        }
        true
    }

    /// Applies ordering and limit in place. Used by in-memory evaluation;
    /// the SQL path expresses the same in ORDER BY / LIMIT.
    pub fn sort_and_truncate(&self, rows: &mut Vec<Value>) {
        if let Some(order) = &self.order_by {
            rows.sort_by(|a, b| {
                let cmp = compare_values(
                    a.get(&order.field).unwrap_or(&Value::Null),
                    b.get(&order.field).unwrap_or(&Value::Null),
                )
                .unwrap_or(Ordering::Equal);
                if order.ascending { cmp } else { cmp.reverse() }
            });
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
    }
}

/// Equality with numeric leniency (integer and float forms compare equal).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Orders two JSON scalars: numbers numerically, strings lexically
/// (ISO-8601 timestamps order correctly as strings).
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
