//! Completion of partially loaded relation values.

use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    core::{spawn_action_async, ActionContext},
    error::FetchError,
    form::{SetValue, WeakForm},
    registry::Registry,
    schema::Schema,
    value::{lookup, record_id, Record},
    widget::Widget,
    Form, FormState, Subscription,
};


/// Reads records of a model.
pub trait Fetcher {
    fn read_by_id(
        &self,
        model: &str,
        id: i64,
        fields: &[String],
    ) -> LocalBoxFuture<'static, Result<Record, FetchError>>;

    /// Whether the current user may read records of `model`.
    fn can_read(&self, _model: &str) -> bool {
        true
    }
}

/// What a relation value needs from its related record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelatedSpec {
    /// Model of the related record.
    pub target: String,
    /// Display-name field.
    pub target_name: Option<String>,
    /// Dotted names to keep present on the value.
    pub fields: Vec<String>,
    /// The value is edited through a custom inline editor.
    pub inline_editor: bool,
}

impl RelatedSpec {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }
    /// Spec of the relation field `schema`, reading `related` from its related record.
    ///
    /// The display-name field is always part of the requested names.
    pub fn from_schema(schema: &Schema, related: &[String]) -> Self {
        let mut fields = related.to_vec();
        if let Some(name) = &schema.target_name {
            if !fields.contains(name) {
                fields.push(name.clone());
            }
        }
        Self {
            target: schema.target.clone().unwrap_or_default(),
            target_name: schema.target_name.clone(),
            fields,
            inline_editor: schema.editor.is_some(),
        }
    }
}

/// Names of `names` that cannot be resolved on `value`.
///
/// A name stopping at an explicit `null` is known to be absent and is not missing.
pub fn missing_fields(value: &Value, names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| !lookup(value, name).is_resolved())
        .cloned()
        .collect()
}

/// Options of [`ensure_related`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnsureOptions {
    /// Fetch every name of the spec, present or not.
    pub refetch: bool,
}

fn positive_id(value: &Value) -> Option<i64> {
    value
        .as_object()?
        .get("id")
        .and_then(Value::as_i64)
        .filter(|id| *id > 0)
}

/// Return `value` completed with the names of `spec` it lacks.
///
/// Values without a positive id, or of a model that cannot be read, are returned as they are.
/// Fetched values win over present ones. When the fetch fails, the display-name field
/// falls back to the id.
pub async fn ensure_related(
    fetcher: &dyn Fetcher,
    value: Value,
    spec: &RelatedSpec,
    options: EnsureOptions,
) -> Value {
    let Some(id) = positive_id(&value) else {
        return value;
    };
    if !fetcher.can_read(&spec.target) {
        return value;
    }
    let names = if options.refetch {
        spec.fields.clone()
    } else {
        missing_fields(&value, &spec.fields)
    };
    if names.is_empty() {
        return value;
    }
    let result = fetcher.read_by_id(&spec.target, id, &names).await;
    let Value::Object(mut merged) = value else {
        return value;
    };
    match result {
        Ok(fetched) => {
            merged.extend(fetched);
            if !spec.inline_editor {
                merged.remove("version");
            }
        }
        Err(e) => {
            warn!(error = %e, "related record not fetched");
            if let Some(name) = &spec.target_name {
                if merged.get(name).map_or(true, Value::is_null) {
                    merged.insert(name.clone(), Value::from(id));
                }
            }
        }
    }
    Value::Object(merged)
}

/// Completed value of a reference-select field and the model it was fetched for.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceValue {
    pub model: Value,
    pub value: Value,
}

enum Source {
    /// The relation value is stored in the record.
    Field,
    /// The record only stores an id and the model comes from another field. The full
    /// value is kept in [`FormState::references`].
    Reference { selector: String },
}

/// Keeps one relation value of a form complete.
#[derive(Clone)]
pub struct RelatedField(Rc<RelatedNode>);

struct RelatedNode {
    form: WeakForm,
    path: String,
    source: Source,
    spec: RelatedSpec,
    fetcher: Rc<dyn Fetcher>,
    listeners: Registry<Rc<dyn Fn(&Value)>>,
}

impl RelatedField {
    /// Driver for the relation value stored at `path`.
    pub fn new(
        form: &Form,
        path: impl Into<String>,
        spec: RelatedSpec,
        fetcher: Rc<dyn Fetcher>,
    ) -> Self {
        Self::with_source(form, path.into(), Source::Field, spec, fetcher)
    }

    /// Driver for the relation field bound to `widget`.
    pub fn from_widget(widget: &Widget, fetcher: Rc<dyn Fetcher>) -> Option<Self> {
        let name = widget.name()?;
        let form = widget.form();
        let spec = RelatedSpec::from_schema(widget.schema(), form.related_fields(name));
        Some(Self::new(form, name, spec, fetcher))
    }

    /// Driver for a reference-select value: the record stores the id at `id_path` and the
    /// model name at `selector`.
    pub fn reference(
        form: &Form,
        id_path: impl Into<String>,
        selector: impl Into<String>,
        spec: RelatedSpec,
        fetcher: Rc<dyn Fetcher>,
    ) -> Self {
        let source = Source::Reference {
            selector: selector.into(),
        };
        Self::with_source(form, id_path.into(), source, spec, fetcher)
    }

    fn with_source(
        form: &Form,
        path: String,
        source: Source,
        spec: RelatedSpec,
        fetcher: Rc<dyn Fetcher>,
    ) -> Self {
        Self(Rc::new(RelatedNode {
            form: form.downgrade(),
            path,
            source,
            spec,
            fetcher,
            listeners: Registry::new(),
        }))
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Current relation value.
    pub fn value(&self) -> Option<Value> {
        let form = self.0.form.upgrade()?;
        self.0.value_in(&form.get())
    }

    /// Call `f` with the completed value each time a fetch result is committed.
    pub fn subscribe(&self, f: impl Fn(&Value) + 'static) -> Subscription {
        self.0.listeners.register(Rc::new(f))
    }

    /// Complete the current value in the background.
    ///
    /// The result is dropped if the value changed while the fetch was in flight.
    pub fn ensure(&self, refetch: bool) {
        let node = self.0.clone();
        spawn_action_async(move |aac| async move {
            let Some((value, spec)) = node.snapshot() else {
                return;
            };
            let options = EnsureOptions { refetch };
            let next = ensure_related(&*node.fetcher, value.clone(), &spec, options).await;
            if next == value {
                return;
            }
            aac.call(|ac| node.commit(ac, &value, next));
        });
    }

    /// Ensure the value now and again whenever it, its model selector or its `refresh`
    /// counter changes. A `refresh` forces a refetch.
    pub fn watch(&self, ac: &mut ActionContext) -> Subscription {
        let Some(form) = self.0.form.upgrade() else {
            return Subscription::empty();
        };
        let this = self.clone();
        let mut seen: Option<(Option<Value>, Option<Value>, u64)> = None;
        form.subscribe_to_record_changes(ac, move |_, draft| {
            let node = &this.0;
            let next = (node.value_in(draft), node.selector_in(draft), node.refresh_in(draft));
            let refetch = match &seen {
                Some(prev) if *prev == next => return,
                Some((_, _, refresh)) => *refresh != next.2,
                None => false,
            };
            seen = Some(next);
            this.ensure(refetch);
        })
    }
}

impl RelatedNode {
    fn value_in(&self, state: &FormState) -> Option<Value> {
        let stored = state.value(&self.path).filter(|v| !v.is_null())?;
        match &self.source {
            Source::Field => Some(stored.clone()),
            Source::Reference { selector } => {
                let id = record_id(stored)?;
                let model = state.value(selector).cloned().unwrap_or_default();
                match state.references.get(&self.path) {
                    Some(r) if r.model == model && record_id(&r.value) == Some(id) => {
                        Some(r.value.clone())
                    }
                    _ => Some(serde_json::json!({ "id": id })),
                }
            }
        }
    }
    fn selector_in(&self, state: &FormState) -> Option<Value> {
        match &self.source {
            Source::Field => None,
            Source::Reference { selector, .. } => state.value(selector).cloned(),
        }
    }
    fn refresh_in(&self, state: &FormState) -> u64 {
        state
            .states_by_name
            .get(&self.path)
            .map_or(0, |s| s.attrs.refresh())
    }

    fn snapshot(&self) -> Option<(Value, RelatedSpec)> {
        let form = self.form.upgrade()?;
        let state = form.get();
        let value = self.value_in(&state)?;
        let mut spec = self.spec.clone();
        if let Some(Value::String(model)) = self.selector_in(&state) {
            spec.target = model;
        }
        Some((value, spec))
    }

    fn commit(&self, ac: &mut ActionContext, fetched_for: &Value, next: Value) {
        let Some(form) = self.form.upgrade() else {
            return;
        };
        let state = form.get();
        if self.value_in(&state).as_ref() != Some(fetched_for) {
            debug!(path = %self.path, "stale related value discarded");
            return;
        }
        let changed = match &self.source {
            Source::Field => form.set_field_value(ac, &self.path, next.clone(), SetValue::SYSTEM),
            Source::Reference { selector } => {
                let reference = ReferenceValue {
                    model: state.value(selector).cloned().unwrap_or_default(),
                    value: next.clone(),
                };
                let changed = form.modify(ac, |s| {
                    s.references.insert(self.path.clone(), reference);
                });
                if changed {
                    form.notifier().notify();
                }
                changed
            }
        };
        if changed {
            for listener in self.listeners.snapshot() {
                listener(&next);
            }
        }
    }
}
