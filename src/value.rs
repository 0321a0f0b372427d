//! Dotted-path access and value conventions for records.
//!
//! Records are JSON objects. Relation values are objects carrying at least an `id`,
//! to-many relations are arrays of such objects.

use serde_json::{Map, Value};


/// Field name to value mapping of one record.
pub type Record = Map<String, Value>;

/// Result of walking a dotted path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Lookup<'a> {
    /// Every segment resolved.
    Found(&'a Value),
    /// An intermediate segment is explicitly `null`, so the rest is known to be absent.
    Null,
    /// Some segment is not defined at all.
    Missing,
}
impl Lookup<'_> {
    /// `true` unless some segment was undefined.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Lookup::Missing)
    }
}

/// Walk `path` on an arbitrary value.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Lookup<'a> {
    let mut current = value;
    for name in path.split('.') {
        match current {
            Value::Null => return Lookup::Null,
            Value::Object(map) => match map.get(name) {
                Some(v) => current = v,
                None => return Lookup::Missing,
            },
            _ => return Lookup::Missing,
        }
    }
    Lookup::Found(current)
}

/// Value at `path`, or `None` if any segment is missing.
pub fn get_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let (head, rest) = split_head(path);
    let value = record.get(head)?;
    match rest {
        None => Some(value),
        Some(rest) => match lookup(value, rest) {
            Lookup::Found(v) => Some(v),
            _ => None,
        },
    }
}

/// Write `value` at `path`, creating intermediate objects where needed.
///
/// Intermediate values that are not objects are replaced.
pub fn set_path(record: &mut Record, path: &str, value: Value) {
    let (head, rest) = split_head(path);
    match rest {
        None => {
            record.insert(head.to_string(), value);
        }
        Some(rest) => {
            let entry = record.entry(head).or_insert(Value::Null);
            if !entry.is_object() {
                *entry = Value::Object(Record::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

/// Copy of `record` with `value` written at `path`.
pub fn with_path(record: &Record, path: &str, value: Value) -> Record {
    let mut record = record.clone();
    set_path(&mut record, path, value);
    record
}

pub fn split_head(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

/// Empty or whitespace-only strings become `null`.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::String(s) if s.trim().is_empty() => Value::Null,
        value => value,
    }
}

/// A bare number supplied for a relation becomes `{id: number}`, also inside arrays.
pub fn to_reference(value: Value) -> Value {
    match value {
        Value::Number(id) => {
            let mut map = Record::new();
            map.insert("id".into(), Value::Number(id));
            Value::Object(map)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(to_reference).collect()),
        value => value,
    }
}

/// `true` if any segment of `name` marks a transient field (`$name` or `__name`).
pub fn is_transient(name: &str) -> bool {
    name.split('.')
        .any(|segment| segment.starts_with('$') || segment.starts_with("__"))
}

/// `name` without leading `$` characters.
pub fn base_name(name: &str) -> &str {
    name.trim_start_matches('$')
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Deep equality where numbers compare by value, so `1` and `1.0` are the same.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b || a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_value(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| same_value(v, w)))
        }
        _ => a == b,
    }
}

/// The `id` of a relation value, accepting a bare number as well.
pub fn record_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => map.get("id").and_then(Value::as_i64),
        _ => None,
    }
}
