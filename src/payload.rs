//! Record shapes derived for evaluation contexts and save requests.

use serde_json::Value;

use crate::{
    schema::Fields,
    value::{base_name, is_transient, is_truthy, Record},
};


const IGNORE: &[&str] = &[
    "$processInstanceId",
    "_dirty",
    "_fetched",
    "_showRecord",
    "__check_version",
    "_showSingle",
];

/// Moves `version` to `$version` so the token is not sent as a field value.
pub fn remove_version(record: &Record) -> Record {
    let mut rest = record.clone();
    let version = rest.remove("version");
    let dollar = rest.remove("$version");
    let token = match version {
        Some(v) if !v.is_null() => v,
        _ => dollar.unwrap_or(Value::Null),
    };
    rest.insert("$version".into(), token);
    rest
}

fn remove_version_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(remove_version(map)),
        Value::Array(items) => Value::Array(items.iter().map(remove_version_value).collect()),
        v => v.clone(),
    }
}

/// Original snapshot of a freshly loaded record.
///
/// Relations that are saved on their own keep their version only as `$version`,
/// so saving the owner never triggers a version check on them.
pub fn process_original(record: &Record, fields: &Fields) -> Record {
    let mut original = record.clone();
    for field in fields.values().filter(|f| f.kind.is_independent()) {
        if let Some(value) = original.get_mut(&field.name) {
            if is_truthy_relation(value) {
                *value = remove_version_value(value);
            }
        }
    }
    original
}

fn is_truthy_relation(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Canonical shape used to compare values.
///
/// Saved references without a version collapse to their id, nulls and selection flags are
/// dropped, and transient keys of nested objects are ignored.
pub fn compact(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|x| !x.is_null())
                .map(compact)
                .collect(),
        ),
        Value::Object(map) => {
            let id = map.get("id").and_then(Value::as_i64).unwrap_or(0);
            if id > 0 && !map.contains_key("version") {
                return Value::from(id);
            }
            let mut result = Record::new();
            for (k, v) in map {
                if v.is_null() || k == "selected" {
                    continue;
                }
                let v = match compact(v) {
                    Value::Object(child) => Value::Object(exclude_transient(child)),
                    v => v,
                };
                result.insert(k.clone(), v);
            }
            if let Some(dummy_id) = map.get("$id") {
                if result.get("id").map_or(true, |id| !is_truthy(id)) {
                    result.insert("id".into(), dummy_id.clone());
                }
            }
            Value::Object(result)
        }
        v => v.clone(),
    }
}

fn exclude_transient(map: Record) -> Record {
    map.into_iter().filter(|(k, _)| !is_transient(k)).collect()
}

/// Whether two values are equal once compacted.
pub fn equals(a: &Value, b: &Value) -> bool {
    compact(a) == compact(b)
}

/// Entries of `a` that differ from `b`, always keeping `id` and `version`.
///
/// Unsaved records (no positive id) are returned unchanged.
pub fn diff(a: &Record, b: &Record) -> Record {
    let id = a.get("id").and_then(Value::as_i64).unwrap_or(0);
    if id < 1 {
        return a.clone();
    }
    a.iter()
        .filter(|(k, v)| {
            *k == "id" || *k == "version" || !equals(v, b.get(*k).unwrap_or(&Value::Null))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Context values handed to business logic and expression evaluators.
///
/// Internal keys are dropped, `$name` values are also visible as `name` when that is
/// absent, and unsaved (negative) ids become `null`. Applied recursively.
pub fn process_context_values(context: Record) -> Record {
    match process_value(Value::Object(context)) {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn process_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut result = Record::new();
            let mut dummies = Vec::new();
            for (k, v) in map {
                if IGNORE.contains(&k.as_str()) || k.starts_with("$t:") {
                    continue;
                }
                let v = process_value(v);
                if k.starts_with('$') && k != "$version" {
                    dummies.push((base_name(&k).to_string(), v.clone()));
                }
                result.insert(k, v);
            }
            for (k, v) in dummies {
                let slot = result.entry(k).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = v;
                }
            }
            if result.get("id").and_then(Value::as_i64).is_some_and(|id| id < 0) {
                result.insert("id".into(), Value::Null);
            }
            Value::Object(result)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(process_value).collect()),
        v => v,
    }
}

/// Make `$name` values visible as `name` where `name` is absent or null.
pub fn merge_clean_dummy(mut record: Record) -> Record {
    let dummies: Vec<_> = record
        .iter()
        .filter(|(k, _)| is_transient(k))
        .map(|(k, v)| (base_name(k).to_string(), v.clone()))
        .collect();
    for (k, v) in dummies {
        let slot = record.entry(k).or_insert(Value::Null);
        if slot.is_null() {
            *slot = v;
        }
    }
    record
}

/// Values to send when saving `record`.
///
/// Transient keys are stripped at every level, `$version` is kept.
pub fn save_values(record: &Record) -> Record {
    let mut record = record.clone();
    record.remove("$attachments");
    strip_transient(process_context_values(record))
}

fn strip_transient(record: Record) -> Record {
    record
        .into_iter()
        .filter(|(k, _)| k == "$version" || !is_transient(k))
        .map(|(k, v)| (k, strip_transient_value(v)))
        .collect()
}

fn strip_transient_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(strip_transient(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_transient_value).collect()),
        v => v,
    }
}

/// JSON text stored in a custom-attributes field.
///
/// `$` keys, nulls, blank strings and empty lists are omitted. Collection rows are reduced
/// to their id, references to `id`, `$version` and their display field.
pub fn compact_json(record: &Record, fields: Option<&Fields>) -> String {
    let mut rec = Record::new();
    for (k, v) in record {
        if k.starts_with('$') || v.is_null() {
            continue;
        }
        let v = match v {
            Value::String(s) if s.trim().is_empty() => continue,
            Value::Array(items) if items.is_empty() => continue,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|x| match x.get("id") {
                        Some(id) if is_truthy(id) => {
                            Value::Object(Record::from_iter([("id".to_string(), id.clone())]))
                        }
                        _ => x.clone(),
                    })
                    .collect(),
            ),
            Value::Object(map) => match fields.and_then(|f| f.get(k)) {
                Some(field) if field.kind.is_reference() => {
                    let mut reference = Record::new();
                    reference.insert("id".into(), map.get("id").cloned().unwrap_or(Value::Null));
                    let version = map
                        .get("version")
                        .filter(|v| !v.is_null())
                        .or_else(|| map.get("$version"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    reference.insert("$version".into(), version);
                    if let Some(name) = &field.target_name {
                        reference.insert(name.clone(), map.get(name).cloned().unwrap_or(Value::Null));
                    }
                    Value::Object(reference)
                }
                _ => v.clone(),
            },
            v => v.clone(),
        };
        rec.insert(k.clone(), v);
    }
    Value::Object(rec).to_string()
}

/// Whether `record` differs from `original` in any field that can dirty the form.
///
/// Version tokens are not compared.
pub fn is_changed(record: &Record, original: &Record) -> bool {
    let keys = record.keys().chain(original.keys());
    for key in keys {
        if is_transient(key) || key == "version" {
            continue;
        }
        let a = without_versions(record.get(key).unwrap_or(&Value::Null));
        let b = without_versions(original.get(key).unwrap_or(&Value::Null));
        if !equals(&a, &b) {
            return true;
        }
    }
    false
}

fn without_versions(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| *k != "version" && *k != "$version")
                .map(|(k, v)| (k.clone(), without_versions(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(without_versions).collect()),
        v => v.clone(),
    }
}

/// Whether `name` is a view-only field not backed by the model.
pub fn is_dummy(name: &str, fields: &Fields) -> bool {
    const EXTRA: &[&str] = &[
        "id",
        "version",
        "$version",
        "$attachments",
        "$processInstanceId",
        "_dirty",
        "_fetched",
    ];
    if fields.contains_key(name) || EXTRA.contains(&name) || name.starts_with("$t:") {
        return false;
    }
    if fields
        .keys()
        .filter_map(|k| k.split_once('.'))
        .any(|(head, _)| head == name)
    {
        return false;
    }
    if let Some(base) = name.strip_suffix("$value") {
        if fields.contains_key(base) {
            return false;
        }
    }
    true
}
