//! Record and value helpers.
//!
//! Records are JSON objects. `serde_json::Map` keeps keys ordered, which makes
//! the serialized form of a record (and of anything containing one)
//! deterministic.

use std::cmp::Ordering;

pub use serde_json::{Map, Value, json};

/// A single stored or in-flight document.
pub type Record = Map<String, Value>;

/// Name of the identity field assigned by the persistence collaborator.
pub const ID_FIELD: &str = "id";

/// Get the identity of a record.
pub fn record_id(record: &Record) -> Option<&Value> {
    record.get(ID_FIELD).filter(|v| !v.is_null())
}

/// Compare two optional values treating a missing key as `null`.
pub fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Order two values of compatible kinds.
///
/// Numbers compare numerically, strings and booleans naturally. `null` sorts
/// before everything. Incompatible kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Short name for the JSON kind of a value, used in validation messages.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Copy of `record` restricted to `fields` (the identity is always kept).
pub fn project(record: &Record, fields: &[String]) -> Record {
    record
        .iter()
        .filter(|(k, _)| k.as_str() == ID_FIELD || fields.iter().any(|f| f == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
