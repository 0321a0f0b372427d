//! Field constraints checked on every settle pass.

use regex::Regex;
use serde_json::Value;

use crate::{
    core::ActionContext,
    options::FormOptions,
    widget::{derive_widget_state, ErrorKind, Errors, Widget, WidgetState},
    Subscription,
};

#[cfg(test)]
mod tests;

const KINDS: [ErrorKind; 4] = [
    ErrorKind::Required,
    ErrorKind::Pattern,
    ErrorKind::Min,
    ErrorKind::Max,
];

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Constraint errors of a widget in `state` holding `value`.
///
/// Hidden widgets have no errors. Only `required`, `pattern`, `min` and `max` are produced.
pub fn validate(state: &WidgetState, value: Option<&Value>, options: &FormOptions) -> Errors {
    let mut errors = Errors::new();
    let attrs = &state.attrs;
    if attrs.hidden() {
        return errors;
    }
    if is_empty(value) {
        if attrs.required() {
            errors.insert(ErrorKind::Required, options.required_message.clone());
        }
        return errors;
    }
    let Some(value) = value else {
        return errors;
    };

    if let (Some(pattern), Value::String(text)) =
        (attrs.get("pattern").and_then(Value::as_str), value)
    {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(text) => {
                errors.insert(ErrorKind::Pattern, "Invalid format".into());
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(pattern, error = %e, "invalid pattern ignored"),
        }
    }

    if let Some(n) = as_number(value) {
        if let Some(min) = attrs.get("min").and_then(as_number).filter(|min| n < *min) {
            errors.insert(ErrorKind::Min, format!("Value must be at least {min}"));
        }
        if let Some(max) = attrs.get("max").and_then(as_number).filter(|max| n > *max) {
            errors.insert(ErrorKind::Max, format!("Value must be at most {max}"));
        }
    }

    if let Value::String(text) = value {
        let len = text.chars().count() as f64;
        if let Some(min) = attrs.get("minSize").and_then(as_number).filter(|min| len < *min) {
            errors.insert(ErrorKind::Min, format!("Length must be at least {min}"));
        }
        if let Some(max) = attrs.get("maxSize").and_then(as_number).filter(|max| len > *max) {
            errors.insert(ErrorKind::Max, format!("Length must be at most {max}"));
        }
    }
    errors
}

/// Keep the constraint errors of `widget` up to date.
///
/// Errors set by `validIf` or by actions are left alone.
pub fn bind_validation(ac: &mut ActionContext, widget: &Widget) -> Subscription {
    let Some(name) = widget.name().map(str::to_string) else {
        return Subscription::empty();
    };
    let schema = widget.schema().clone();
    let defaults = widget.defaults().clone();
    let parent = widget.parent().map(|p| p.uid().to_string());
    let options = widget.form().options().clone();
    widget
        .form()
        .subscribe_to_record_changes(ac, move |_, draft| {
            let state = derive_widget_state(&schema, &defaults, draft);
            let errors = validate(&state, draft.value(&name), &options);
            let local = draft.states.get(&schema.uid);
            let unchanged = KINDS.iter().all(|kind| {
                local.and_then(|s| s.errors.get(kind)) == errors.get(kind)
            });
            if unchanged {
                return;
            }
            let local = draft
                .states
                .entry(schema.uid.clone())
                .or_insert_with(|| WidgetState {
                    parent: parent.clone(),
                    ..WidgetState::named(Some(name.as_str()))
                });
            for kind in KINDS {
                match errors.get(&kind) {
                    Some(message) => local.errors.insert(kind, message.clone()),
                    None => local.errors.remove(&kind),
                };
            }
        })
}
