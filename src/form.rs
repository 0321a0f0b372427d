use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    fmt,
    rc::{Rc, Weak},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    action::FormActionHandler,
    core::ActionContext,
    notify::{EvalContext, RecordNotifier, Scheduler},
    options::FormOptions,
    related::ReferenceValue,
    payload::{self, is_dummy, merge_clean_dummy, process_context_values, process_original},
    schema::{find_related, process_view, Fields, Property, Schema, UidGen, ViewFields},
    value::{
        get_path, is_transient, normalize, same_value, set_path, split_head, to_reference, Record,
    },
    widget::{derive_widget_state, Widget, WidgetState},
    Subscription,
};


/// Static description of the model a form edits.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormMeta {
    pub model: String,
    pub fields: Fields,
    pub view: Option<Schema>,
    /// Set when the form edits the custom attributes stored in this field of its parent.
    pub json_field: Option<String>,
}
impl FormMeta {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Snapshot of one form.
///
/// A new snapshot replaces the previous one on every change, so `Rc::ptr_eq` on the
/// snapshot, its `record` or its `original` detects "nothing changed".
#[derive(Clone, Debug)]
pub struct FormState {
    pub meta: Rc<FormMeta>,
    pub record: Rc<Record>,
    pub original: Rc<Record>,
    pub dirty: bool,
    /// Local state of each widget occurrence, keyed by `uid`.
    pub states: BTreeMap<String, WidgetState>,
    /// Shared state of every widget bound to a name.
    pub states_by_name: BTreeMap<String, WidgetState>,
    /// Selected row ids of collection fields.
    pub select: BTreeMap<String, BTreeSet<i64>>,
    /// Completed reference-select values, keyed by the path holding their id.
    pub references: BTreeMap<String, ReferenceValue>,
    /// Context supplied by whatever opened the form.
    pub context: Rc<Record>,
    pub parent: Option<Form>,
}

impl PartialEq for FormState {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.meta, &other.meta)
            && self.record == other.record
            && self.original == other.original
            && self.dirty == other.dirty
            && self.states == other.states
            && self.states_by_name == other.states_by_name
            && self.select == other.select
            && self.references == other.references
            && self.context == other.context
            && self.parent == other.parent
    }
}

impl FormState {
    pub fn model(&self) -> &str {
        &self.meta.model
    }
    pub fn fields(&self) -> &Fields {
        &self.meta.fields
    }
    /// Metadata of the field at `path`, looked up by full name first, then by its head.
    pub fn field(&self, path: &str) -> Option<&Property> {
        let fields = self.fields();
        fields.get(path).or_else(|| fields.get(split_head(path).0))
    }
    pub fn value(&self, path: &str) -> Option<&Value> {
        get_path(&self.record, path)
    }
    /// Whether a write to `path` made by an action can dirty the form.
    ///
    /// Transient names never do, and neither do names the model does not declare.
    pub fn is_persistable(&self, path: &str) -> bool {
        !is_transient(path) && self.field(path).is_some()
    }
    /// Whether any field that can dirty the form differs from its loaded value.
    pub fn is_changed(&self) -> bool {
        payload::is_changed(&self.record, &self.original)
    }
    /// `value` as it is stored at `path`: blank strings become `null` and a bare number
    /// given for a relation field becomes `{id}`.
    pub fn coerce(&self, path: &str, value: Value) -> Value {
        let value = normalize(value);
        match self.fields().get(path) {
            Some(field) if field.kind.is_relation() => to_reference(value),
            _ => value,
        }
    }
    /// Whether `path` already holds `value`. Numbers compare by value.
    pub fn holds(&self, path: &str, value: &Value) -> bool {
        self.value(path).is_some_and(|v| same_value(v, value))
    }
    /// Shared state for `name`, created if absent.
    pub fn state_by_name(&mut self, name: &str) -> &mut WidgetState {
        self.states_by_name
            .entry(name.to_string())
            .or_insert_with(|| WidgetState::named(Some(name)))
    }
}

/// Options of [`Form::set_field_value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetValue {
    /// Run the field's `onChange` business logic after the write.
    pub fire_on_change: bool,
    /// Mark the form dirty, unless the field is transient.
    pub mark_dirty: bool,
}
impl SetValue {
    /// A computed write, such as a `bind` result or fetched related values.
    pub const SYSTEM: Self = Self {
        fire_on_change: false,
        mark_dirty: false,
    };
    /// A user edit that also triggers `onChange`.
    pub const USER: Self = Self {
        fire_on_change: true,
        mark_dirty: true,
    };
}
impl Default for SetValue {
    fn default() -> Self {
        Self {
            fire_on_change: false,
            mark_dirty: true,
        }
    }
}

#[derive(Default)]
struct SchemaIndex {
    by_uid: BTreeMap<String, Rc<Schema>>,
    by_name: BTreeMap<String, Rc<Schema>>,
    view_fields: ViewFields,
}
impl SchemaIndex {
    fn new(meta: &FormMeta) -> Self {
        let mut index = Self::default();
        if let Some(view) = &meta.view {
            view.walk(&mut |schema| {
                let schema = Rc::new(schema.clone());
                if let Some(name) = &schema.name {
                    index
                        .by_name
                        .entry(name.clone())
                        .or_insert_with(|| schema.clone());
                }
                index.by_uid.insert(schema.uid.clone(), schema);
            });
            index.view_fields = find_related(view, &meta.fields);
        }
        index
    }
    fn get(&self, key: &str) -> Option<&Rc<Schema>> {
        self.by_uid.get(key).or_else(|| self.by_name.get(key))
    }
}

/// One form instance: record store, widget states and the pipelines that keep them consistent.
#[derive(Clone)]
pub struct Form(Rc<FormNode>);

#[derive(Clone)]
pub(crate) struct WeakForm(Weak<FormNode>);

impl WeakForm {
    pub(crate) fn upgrade(&self) -> Option<Form> {
        self.0.upgrade().map(Form)
    }
}

struct FormNode {
    state: RefCell<Rc<FormState>>,
    options: FormOptions,
    index: SchemaIndex,
    notifier: RecordNotifier,
    actions: FormActionHandler,
}
impl Drop for FormNode {
    fn drop(&mut self) {
        self.notifier.completed();
    }
}

impl Form {
    pub fn new(meta: FormMeta, record: Record) -> Self {
        Self::builder(meta).record(record).build()
    }
    pub fn builder(meta: FormMeta) -> FormBuilder {
        FormBuilder::new(meta)
    }

    pub fn get(&self) -> Rc<FormState> {
        self.0.state.borrow().clone()
    }
    pub fn record(&self) -> Rc<Record> {
        self.get().record.clone()
    }
    pub fn meta(&self) -> Rc<FormMeta> {
        self.get().meta.clone()
    }
    pub fn options(&self) -> &FormOptions {
        &self.0.options
    }
    pub fn notifier(&self) -> &RecordNotifier {
        &self.0.notifier
    }
    pub fn actions(&self) -> &FormActionHandler {
        &self.0.actions
    }
    pub(crate) fn downgrade(&self) -> WeakForm {
        WeakForm(Rc::downgrade(&self.0))
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Replace the snapshot with the one `f` returns.
    ///
    /// Returning the same `Rc` is a no-op. A new `record` schedules a settle.
    pub fn update(
        &self,
        _ac: &mut ActionContext,
        f: impl FnOnce(&Rc<FormState>) -> Rc<FormState>,
    ) -> bool {
        let prev = self.get();
        let next = f(&prev);
        if Rc::ptr_eq(&prev, &next) {
            return false;
        }
        let record_changed = !Rc::ptr_eq(&prev.record, &next.record);
        *self.0.state.borrow_mut() = next;
        if record_changed {
            self.0.notifier.notify();
        }
        true
    }

    /// Apply `f` to a copy of the snapshot and commit it if anything changed.
    pub fn modify(&self, ac: &mut ActionContext, f: impl FnOnce(&mut FormState)) -> bool {
        self.update(ac, |prev| {
            let mut next = FormState::clone(prev);
            f(&mut next);
            if next == **prev {
                return prev.clone();
            }
            if next.record == prev.record {
                next.record = prev.record.clone();
            }
            if next.original == prev.original {
                next.original = prev.original.clone();
            }
            Rc::new(next)
        })
    }

    /// Write `value` at the dotted `path` of the record.
    ///
    /// The value is stored as [`FormState::coerce`] returns it. Writing a value equal to
    /// the current one does nothing. Returns `true` if the record changed.
    pub fn set_field_value(
        &self,
        ac: &mut ActionContext,
        path: &str,
        value: Value,
        options: SetValue,
    ) -> bool {
        let value = self.get().coerce(path, value);
        if self.get().holds(path, &value) {
            return false;
        }
        let dirty = options.mark_dirty && !is_transient(path);
        self.modify(ac, |s| {
            set_path(Rc::make_mut(&mut s.record), path, value);
            if dirty {
                s.dirty = true;
            }
        });
        if options.fire_on_change {
            self.fire_on_change(path);
        }
        true
    }

    fn fire_on_change(&self, path: &str) {
        let on_change = self.0.index.by_name.get(path).and_then(|s| s.on_change.clone());
        if let Some(action) = on_change {
            self.0.actions.execute(&action, Some(path));
        }
    }

    /// Replace record and original with a freshly loaded record.
    ///
    /// Shared state of transient view fields is reset, other widget state is kept.
    pub fn load(&self, ac: &mut ActionContext, record: Record) {
        let view_fields: Vec<String> = self
            .0
            .index
            .by_name
            .values()
            .filter(|s| s.is_field())
            .filter_map(|s| s.name.clone())
            .collect();
        self.modify(ac, move |s| {
            let meta = s.meta.clone();
            let fields = &meta.fields;
            s.original = Rc::new(process_original(&record, fields));
            s.record = Rc::new(record);
            s.dirty = false;
            s.select.clear();
            s.states_by_name
                .retain(|name, _| !view_fields.contains(name) || !is_dummy(name, fields));
        });
    }

    /// Restore the loaded record.
    pub fn discard(&self, ac: &mut ActionContext) {
        self.modify(ac, |s| {
            s.record = s.original.clone();
            s.dirty = false;
        });
    }

    /// Mark rows of the collection `field` as selected.
    pub fn set_selected(&self, ac: &mut ActionContext, field: &str, ids: impl IntoIterator<Item = i64>) {
        let ids: BTreeSet<i64> = ids.into_iter().collect();
        self.modify(ac, |s| {
            if ids.is_empty() {
                s.select.remove(field);
            } else {
                s.select.insert(field.to_string(), ids);
            }
        });
    }

    /// Context passed to business logic and expressions.
    pub fn context(&self) -> Record {
        self.context_with(Record::new())
    }
    /// Like [`context`](Self::context), with `extra` values below the record.
    pub fn context_with(&self, extra: Record) -> Record {
        let state = self.get();
        let mut context = Record::clone(&state.context);
        context.extend(extra);
        for (k, v) in state.record.iter() {
            context.insert(k.clone(), v.clone());
        }
        context.insert("_model".into(), Value::String(state.meta.model.clone()));
        for (name, ids) in &state.select {
            if let Some(Value::Array(rows)) = context.get_mut(name) {
                for row in rows.iter_mut().filter_map(Value::as_object_mut) {
                    let selected = row
                        .get("id")
                        .and_then(Value::as_i64)
                        .is_some_and(|id| ids.contains(&id));
                    if selected {
                        row.insert("selected".into(), Value::Bool(true));
                    }
                }
            }
        }
        let mut context = process_context_values(context);
        if let Some(parent) = &state.parent {
            context.insert("_parent".into(), Value::Object(parent.context()));
        }
        merge_clean_dummy(context)
    }

    /// Processed schema node with the given `uid` or name.
    pub fn schema(&self, key: &str) -> Option<Rc<Schema>> {
        self.0.index.get(key).cloned()
    }
    /// Dotted names each relation field of the view needs from its related record.
    pub fn related_fields(&self, name: &str) -> &[String] {
        self.0
            .index
            .view_fields
            .related
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
    /// Field names used by the view.
    pub fn view_fields(&self) -> &[String] {
        &self.0.index.view_fields.fields
    }

    /// Effective widget state for a `uid` or a field name.
    ///
    /// Unknown keys fall back to the shared state of that name on top of an empty schema.
    pub fn widget_state(&self, key: &str) -> WidgetState {
        let state = self.get();
        match self.0.index.get(key) {
            Some(schema) => derive_widget_state(schema, &schema.default_attrs(), &state),
            None => {
                let schema = Schema {
                    uid: key.to_string(),
                    name: Some(key.to_string()),
                    ..Schema::default()
                };
                derive_widget_state(&schema, &Default::default(), &state)
            }
        }
    }

    /// Widget handle for the root of the view.
    pub fn root_widget(&self) -> Option<Widget> {
        let view = self.get().meta.view.clone()?;
        Some(Widget::new(self, Rc::new(view), None))
    }

    /// Widget handle for the schema node with the given `uid` or name.
    pub fn widget(&self, key: &str, parent: Option<&Widget>) -> Option<Widget> {
        let schema = self.schema(key)?;
        Some(Widget::new(self, schema, parent))
    }

    /// Register `listener` for settle passes. It also runs once right away.
    pub fn subscribe_to_record_changes(
        &self,
        ac: &mut ActionContext,
        listener: impl FnMut(&EvalContext, &mut FormState) + 'static,
    ) -> Subscription {
        self.0.notifier.subscribe(ac, listener)
    }

    /// Whether no widget carries a validation error.
    pub fn is_valid(&self) -> bool {
        let state = self.get();
        state
            .states
            .values()
            .chain(state.states_by_name.values())
            .all(|s| s.errors.is_empty())
    }
}
impl PartialEq for Form {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.get();
        f.debug_struct("Form")
            .field("model", &state.meta.model)
            .field("dirty", &state.dirty)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Form`].
pub struct FormBuilder {
    meta: FormMeta,
    record: Record,
    context: Record,
    parent: Option<Form>,
    states_by_name: BTreeMap<String, WidgetState>,
    options: FormOptions,
    scheduler: Option<Rc<dyn Scheduler>>,
}

impl FormBuilder {
    fn new(meta: FormMeta) -> Self {
        Self {
            meta,
            record: Record::new(),
            context: Record::new(),
            parent: None,
            states_by_name: BTreeMap::new(),
            options: FormOptions::default(),
            scheduler: None,
        }
    }
    pub fn record(mut self, record: Record) -> Self {
        self.record = record;
        self
    }
    pub fn context(mut self, context: Record) -> Self {
        self.context = context;
        self
    }
    pub fn parent(mut self, parent: &Form) -> Self {
        self.parent = Some(parent.clone());
        self
    }
    pub fn states_by_name(mut self, states: BTreeMap<String, WidgetState>) -> Self {
        self.states_by_name = states;
        self
    }
    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }
    /// Use `scheduler` for settle passes instead of the one chosen by the options.
    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Form {
        let mut meta = self.meta;
        let mut uids = UidGen::new();
        meta.view = meta
            .view
            .map(|view| process_view(&view, &meta.fields, None, &mut uids));
        let index = SchemaIndex::new(&meta);
        let scheduler = self.scheduler.unwrap_or_else(|| self.options.scheduler());
        let record = Rc::new(self.record);
        let state = FormState {
            meta: Rc::new(meta),
            original: record.clone(),
            record,
            dirty: false,
            states: BTreeMap::new(),
            states_by_name: self.states_by_name,
            select: BTreeMap::new(),
            references: BTreeMap::new(),
            context: Rc::new(self.context),
            parent: self.parent,
        };
        let options = self.options;
        Form(Rc::new_cyclic(|this| FormNode {
            state: RefCell::new(Rc::new(state)),
            options,
            index,
            notifier: RecordNotifier::new(WeakForm(this.clone()), scheduler),
            actions: FormActionHandler::new(WeakForm(this.clone())),
        }))
    }
}
