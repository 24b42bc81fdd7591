use crate::collection::Record;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Selects records in a collection.
///
/// Singular operations act on the first matching record in insertion
/// order; plural operations act on every match, in order.
#[derive(Clone)]
pub enum Filter {
    /// Matches every record.
    All,
    /// Matches records whose named fields equal the given values. Fields
    /// not named are ignored; an empty map matches everything.
    Fields(Map<String, Value>),
    /// Matches records for which the function returns true.
    Predicate(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
}

impl Filter {
    pub fn all() -> Self {
        Filter::All
    }

    /// Match records for which `f` returns true.
    ///
    /// Mutating operations call `f` while holding the collection's row
    /// lock, which is not re-entrant: `f` must not read or write the
    /// collection it is filtering, or the call deadlocks.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(f))
    }

    /// Match records where `field` equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert(field.into(), value.into());
        Filter::Fields(fields)
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::Fields(fields) => fields
                .iter()
                .all(|(name, expected)| {
                    record.get(name).is_some_and(|actual| values_equal(actual, expected))
                }),
            Filter::Predicate(f) => f(record),
        }
    }
}

/// JSON equality where numbers compare by value, so `1` equals `1.0`.
/// Arrays and objects compare element-wise.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "All"),
            Filter::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Filter::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(fields: Map<String, Value>) -> Self {
        Filter::Fields(fields)
    }
}

/// Objects become field matchers and `null` matches everything. Any other
/// JSON value cannot describe a record and matches nothing.
impl From<Value> for Filter {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Filter::Fields(fields),
            Value::Null => Filter::All,
            _ => Filter::predicate(|_| false),
        }
    }
}
