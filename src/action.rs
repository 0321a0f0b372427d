//! Events produced by business logic and how a form applies them.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use futures::future::LocalBoxFuture;
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    core::{spawn_action_async, ActionContext},
    error::EventParseError,
    form::{SetValue, WeakForm},
    payload::compact_json,
    registry::Registry,
    value::{get_path, record_id, same_value, set_path, split_head, to_reference, Record},
    widget::ErrorKind,
    Form, FormState, Subscription,
};

#[cfg(test)]
mod tests;

/// Operation of a `value` event.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, FromStr, Serialize, Deserialize,
)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ValueOp {
    Set,
    Add,
    Del,
}

/// One attribute change of an `attrs` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttrChange {
    pub target: String,
    pub name: String,
    #[serde(default)]
    pub value: Value,
}
impl AttrChange {
    pub fn new(target: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self {
            target: target.into(),
            name: name.into(),
            value,
        }
    }
}

/// A discrete state change requested by business logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionEvent {
    Attrs {
        attrs: Vec<AttrChange>,
    },
    Value {
        op: ValueOp,
        target: String,
        #[serde(default)]
        value: Value,
    },
    Record {
        value: Record,
    },
    Focus {
        target: String,
    },
    Close,
    Save,
    Refresh,
    Validate,
}

impl ActionEvent {
    pub fn from_json(s: &str) -> Result<Vec<Self>, EventParseError> {
        let value: Value = serde_json::from_str(s).map_err(EventParseError::new)?;
        let events = match value {
            Value::Array(_) => serde_json::from_value(value),
            value => serde_json::from_value(value).map(|e| vec![e]),
        };
        events.map_err(EventParseError::new)
    }
    pub fn attr(target: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self::Attrs {
            attrs: vec![AttrChange::new(target, name, value)],
        }
    }
    pub fn value(op: ValueOp, target: impl Into<String>, value: Value) -> Self {
        Self::Value {
            op,
            target: target.into(),
            value,
        }
    }
    fn lifecycle(&self) -> Option<Lifecycle> {
        Some(match self {
            Self::Close => Lifecycle::Close,
            Self::Save => Lifecycle::Save,
            Self::Refresh => Lifecycle::Refresh,
            Self::Validate => Lifecycle::Validate,
            _ => return None,
        })
    }
}

/// Lifecycle events delegated to the surface that owns the form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(style = "lowercase")]
pub enum Lifecycle {
    Close,
    Save,
    Refresh,
    Validate,
}

pub type LifecycleHandler = Rc<dyn Fn() -> LocalBoxFuture<'static, ()>>;

/// Runs named business logic and reports the events it produced.
pub trait ActionExecutor {
    fn execute(&self, action: &str, context: Record) -> LocalBoxFuture<'static, Vec<ActionEvent>>;
}

/// Applies [`ActionEvent`]s to one form.
pub struct FormActionHandler {
    form: WeakForm,
    executor: RefCell<Option<Rc<dyn ActionExecutor>>>,
    handlers: RefCell<BTreeMap<Lifecycle, Registry<LifecycleHandler>>>,
    observers: Registry<Rc<dyn Fn(&ActionEvent)>>,
}

impl FormActionHandler {
    pub(crate) fn new(form: WeakForm) -> Self {
        Self {
            form,
            executor: RefCell::new(None),
            handlers: RefCell::new(BTreeMap::new()),
            observers: Registry::new(),
        }
    }

    pub fn set_executor(&self, executor: Rc<dyn ActionExecutor>) {
        *self.executor.borrow_mut() = Some(executor);
    }

    /// Register `handler` for a lifecycle event.
    pub fn on(
        &self,
        event: Lifecycle,
        handler: impl Fn() -> LocalBoxFuture<'static, ()> + 'static,
    ) -> Subscription {
        let registry = self
            .handlers
            .borrow_mut()
            .entry(event)
            .or_default()
            .clone();
        registry.register(Rc::new(handler))
    }

    /// Register `observer`, called with every event before it is applied.
    pub fn observe(&self, observer: impl Fn(&ActionEvent) + 'static) -> Subscription {
        self.observers.register(Rc::new(observer))
    }

    /// Run `action` with the executor and apply the events it produces.
    ///
    /// The context is taken when the runtime starts the action, so it reflects writes
    /// made before that point. `source` names the field that triggered it.
    pub fn execute(&self, action: &str, source: Option<&str>) {
        let Some(executor) = self.executor.borrow().clone() else {
            debug!(action = action, "no executor, action ignored");
            return;
        };
        let form = self.form.clone();
        let action = action.to_string();
        let source = source.map(str::to_string);
        spawn_action_async(move |aac| {
            let context = form.upgrade().map(|f| {
                let mut extra = Record::new();
                if let Some(source) = source {
                    extra.insert("_source".into(), Value::String(source));
                }
                f.context_with(extra)
            });
            let events = context.map(|context| executor.execute(&action, context));
            async move {
                let Some(events) = events else {
                    return;
                };
                let events = events.await;
                aac.call(|ac| {
                    if let Some(form) = form.upgrade() {
                        form.actions().apply_all(ac, &events);
                    }
                });
            }
        });
    }

    pub fn apply_all(&self, ac: &mut ActionContext, events: &[ActionEvent]) {
        for event in events {
            self.apply(ac, event);
        }
    }

    pub fn apply(&self, ac: &mut ActionContext, event: &ActionEvent) {
        let Some(form) = self.form.upgrade() else {
            return;
        };
        for observer in self.observers.snapshot() {
            observer(event);
        }
        match event {
            ActionEvent::Attrs { attrs } => {
                for change in attrs {
                    apply_attr(&form, ac, change);
                }
            }
            ActionEvent::Value { op, target, value } => {
                apply_value(&form, ac, *op, target, value.clone());
            }
            ActionEvent::Record { value } => apply_record(&form, ac, value),
            ActionEvent::Focus { target } => {
                if target.is_empty() {
                    debug!("focus without target ignored");
                    return;
                }
                form.modify(ac, |s| {
                    clear_locals(s, target, "focus");
                    let attrs = &mut s.state_by_name(target).attrs;
                    let count = attrs.focus_count() + 1;
                    attrs.set("focus", Value::from(count));
                });
            }
            ActionEvent::Close | ActionEvent::Save | ActionEvent::Refresh | ActionEvent::Validate => {
                if let Some(lifecycle) = event.lifecycle() {
                    self.run_handlers(lifecycle);
                }
            }
        }
    }

    fn run_handlers(&self, event: Lifecycle) {
        let handlers = self
            .handlers
            .borrow()
            .get(&event)
            .map(Registry::snapshot)
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(lifecycle = %event, "no handler registered");
        }
        for handler in handlers {
            spawn_action_async(move |_| handler());
        }
    }
}

fn value_shorthand(name: &str) -> Option<ValueOp> {
    match name {
        "value" | "value:set" => Some(ValueOp::Set),
        "value:add" => Some(ValueOp::Add),
        "value:del" => Some(ValueOp::Del),
        _ => None,
    }
}

/// `(field, sub_path)` when `path` addresses a sub-path of a collection field.
fn collection_path<'a>(state: &FormState, path: &'a str) -> Option<(&'a str, &'a str)> {
    let (head, rest) = split_head(path);
    let rest = rest?;
    state
        .fields()
        .get(head)
        .filter(|f| f.kind.is_collection())
        .map(|_| (head, rest))
}

/// Drop `name` from the local state of every occurrence bound to `target`, so the shared
/// value written next reaches all of them.
fn clear_locals(s: &mut FormState, target: &str, name: &str) {
    for state in s.states.values_mut() {
        if state.name.as_deref() == Some(target) {
            match name {
                "error" => {
                    state.errors.remove(&ErrorKind::Error);
                }
                _ => {
                    state.attrs.remove(name);
                }
            }
        }
    }
}

fn apply_attr(form: &Form, ac: &mut ActionContext, change: &AttrChange) {
    let AttrChange {
        target,
        name,
        value,
    } = change;
    if target.is_empty() {
        debug!(attr = %name, "attribute without target ignored");
        return;
    }
    if let Some(op) = value_shorthand(name) {
        apply_value(form, ac, op, target, value.clone());
        return;
    }
    form.modify(ac, |s| {
        if let Some((field, column)) = collection_path(s, target) {
            s.state_by_name(field)
                .columns
                .entry(column.to_string())
                .or_default()
                .set(name.clone(), value.clone());
            return;
        }
        clear_locals(s, target, name);
        let state = s.state_by_name(target);
        match name.as_str() {
            "error" => match value {
                Value::String(message) if !message.is_empty() => {
                    state.errors.insert(ErrorKind::Error, message.clone());
                }
                _ => {
                    state.errors.remove(&ErrorKind::Error);
                }
            },
            "refresh" => {
                let count = state.attrs.refresh() + 1;
                state.attrs.set("refresh", Value::from(count));
            }
            _ => {
                state.attrs.set(name.clone(), value.clone());
            }
        }
    });
    if name == "refresh" {
        form.notifier().notify();
    }
}

fn items_of(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        value => vec![value],
    }
}

fn apply_value(form: &Form, ac: &mut ActionContext, op: ValueOp, target: &str, value: Value) {
    if target.is_empty() {
        debug!(%op, "value event without target ignored");
        return;
    }
    let state = form.get();
    let options = SetValue {
        fire_on_change: false,
        mark_dirty: state.is_persistable(target),
    };
    let next = match op {
        ValueOp::Set => match collection_path(&state, target) {
            Some((field, sub_path)) => {
                let Some(Value::Array(rows)) = state.value(field) else {
                    debug!(path = target, "no rows to update");
                    return;
                };
                let value = state.coerce(target, value);
                let rows = rows
                    .iter()
                    .map(|row| match row {
                        Value::Object(row) => {
                            let mut row = row.clone();
                            set_path(&mut row, sub_path, value.clone());
                            Value::Object(row)
                        }
                        row => row.clone(),
                    })
                    .collect();
                form.set_field_value(ac, field, Value::Array(rows), options);
                return;
            }
            None => state.coerce(target, value),
        },
        ValueOp::Add => {
            let mut rows = state.value(target).cloned().map(items_of).unwrap_or_default();
            for item in items_of(to_reference(value)) {
                let id = record_id(&item);
                let position = id.and_then(|id| rows.iter().position(|r| record_id(r) == Some(id)));
                match (position, item) {
                    (Some(index), Value::Object(item)) => {
                        if let Some(Value::Object(row)) = rows.get_mut(index) {
                            for (k, v) in item {
                                row.insert(k, v);
                            }
                        }
                    }
                    (Some(_), _) => {}
                    (None, item) => rows.push(item),
                }
            }
            Value::Array(rows)
        }
        ValueOp::Del => {
            let ids: Vec<i64> = items_of(value).iter().filter_map(record_id).collect();
            let Some(Value::Array(rows)) = state.value(target) else {
                debug!(path = target, "no rows to remove from");
                return;
            };
            Value::Array(
                rows.iter()
                    .filter(|row| !record_id(row).is_some_and(|id| ids.contains(&id)))
                    .cloned()
                    .collect(),
            )
        }
    };
    form.set_field_value(ac, target, next, options);
}

fn apply_record(form: &Form, ac: &mut ActionContext, values: &Record) {
    let changed = form.modify(ac, |s| {
        let mut record = Record::clone(&s.record);
        let mut dirty = false;
        for (path, value) in values {
            let value = s.coerce(path, value.clone());
            if !get_path(&record, path).is_some_and(|v| same_value(v, &value)) {
                dirty |= s.is_persistable(path);
                set_path(&mut record, path, value);
            }
        }
        if record != *s.record {
            s.record = Rc::new(record);
            s.dirty |= dirty;
        }
    });
    if !changed {
        return;
    }
    let state = form.get();
    if let (Some(json_field), Some(parent)) = (&state.meta.json_field, &state.parent) {
        let text = compact_json(&state.record, Some(state.fields()));
        let options = SetValue {
            fire_on_change: false,
            mark_dirty: state.dirty,
        };
        parent.set_field_value(ac, json_field, Value::String(text), options);
    }
}
