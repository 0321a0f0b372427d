use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{core::ActionContext, form::SetValue, schema::Schema, Form, FormState};


/// Visual and behavioral attributes of a widget.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attrs(BTreeMap<String, Value>);

impl Attrs {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
    /// Returns `true` if the stored value changed.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> bool {
        let name = name.into();
        if self.0.get(&name) == Some(&value) {
            return false;
        }
        self.0.insert(name, value);
        true
    }
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }
    /// Overwrite entries with those of `other`.
    pub fn extend_from(&mut self, other: &Attrs) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }
    pub fn hidden(&self) -> bool {
        self.flag("hidden").unwrap_or(false)
    }
    pub fn readonly(&self) -> bool {
        self.flag("readonly").unwrap_or(false)
    }
    pub fn required(&self) -> bool {
        self.flag("required").unwrap_or(false)
    }
    /// `focus` is either a flag or the number of focus requests received.
    pub fn focus(&self) -> bool {
        match self.get("focus") {
            Some(Value::Bool(focus)) => *focus,
            Some(Value::Number(count)) => count.as_u64().is_some_and(|n| n > 0),
            _ => false,
        }
    }
    /// Number of focus requests received.
    pub fn focus_count(&self) -> u64 {
        self.get("focus").and_then(Value::as_u64).unwrap_or(0)
    }
    pub fn collapse(&self) -> bool {
        self.flag("collapse").unwrap_or(false)
    }
    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(Value::as_str)
    }
    pub fn domain(&self) -> Option<&str> {
        self.get("domain").and_then(Value::as_str)
    }
    /// Number of `refresh` signals received.
    pub fn refresh(&self) -> u64 {
        self.get("refresh").and_then(Value::as_u64).unwrap_or(0)
    }
}
impl<K: Into<String>> FromIterator<(K, Value)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Kind of a validation error.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    FromStr,
    Serialize,
    Deserialize,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Required,
    Invalid,
    Pattern,
    Min,
    Max,
    /// Free-form message set by an action.
    Error,
}

pub type Errors = BTreeMap<ErrorKind, String>;

/// State of one widget occurrence, or shared state of every widget bound to one name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetState {
    pub name: Option<String>,
    pub attrs: Attrs,
    pub errors: Errors,
    /// Per sub-column attributes of a collection field.
    pub columns: BTreeMap<String, Attrs>,
    /// `uid` of the enclosing widget.
    pub parent: Option<String>,
}

impl WidgetState {
    pub fn named(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            ..Self::default()
        }
    }
    pub fn column(&self, name: &str) -> Option<&Attrs> {
        self.columns.get(name)
    }
}

/// Effective state of `schema` in `form`.
///
/// Static `defaults` are overridden by the name-keyed state, which is overridden by the
/// state of this occurrence. Columns only come from the name-keyed state.
pub fn derive_widget_state(schema: &Schema, defaults: &Attrs, form: &FormState) -> WidgetState {
    let by_name = schema
        .name
        .as_ref()
        .and_then(|name| form.states_by_name.get(name));
    let by_id = form.states.get(&schema.uid);

    let mut attrs = defaults.clone();
    let mut errors = Errors::new();
    for state in by_name.into_iter().chain(by_id) {
        attrs.extend_from(&state.attrs);
        errors.extend(state.errors.iter().map(|(k, v)| (*k, v.clone())));
    }
    WidgetState {
        name: schema.name.clone(),
        attrs,
        errors,
        columns: by_name.map(|s| s.columns.clone()).unwrap_or_default(),
        parent: None,
    }
}

/// Handle to one rendered occurrence of a schema node.
#[derive(Clone)]
pub struct Widget(Rc<WidgetNode>);

struct WidgetNode {
    form: Form,
    schema: Rc<Schema>,
    defaults: Attrs,
    parent: Option<Widget>,
    memo: RefCell<Memo>,
}

#[derive(Default)]
struct Memo {
    source: Option<Rc<FormState>>,
    state: Option<Rc<WidgetState>>,
}

impl Widget {
    pub fn new(form: &Form, schema: Rc<Schema>, parent: Option<&Widget>) -> Self {
        let defaults = schema.default_attrs();
        Self(Rc::new(WidgetNode {
            form: form.clone(),
            schema,
            defaults,
            parent: parent.cloned(),
            memo: RefCell::new(Memo::default()),
        }))
    }
    /// Widgets for the child nodes of this widget.
    pub fn children(&self) -> Vec<Widget> {
        self.0
            .schema
            .items
            .iter()
            .map(|item| Widget::new(&self.0.form, Rc::new(item.clone()), Some(self)))
            .collect()
    }

    pub fn form(&self) -> &Form {
        &self.0.form
    }
    pub fn schema(&self) -> &Rc<Schema> {
        &self.0.schema
    }
    pub fn uid(&self) -> &str {
        &self.0.schema.uid
    }
    pub fn name(&self) -> Option<&str> {
        self.0.schema.name.as_deref()
    }
    pub fn parent(&self) -> Option<&Widget> {
        self.0.parent.as_ref()
    }
    pub fn defaults(&self) -> &Attrs {
        &self.0.defaults
    }

    /// Effective state of this widget.
    ///
    /// The same `Rc` is returned for as long as the derived state stays deep-equal.
    pub fn state(&self) -> Rc<WidgetState> {
        let source = self.0.form.get();
        let mut memo = self.0.memo.borrow_mut();
        if let (Some(prev_source), Some(state)) = (&memo.source, &memo.state) {
            if Rc::ptr_eq(prev_source, &source) {
                return state.clone();
            }
        }
        let next = self.derive(&source);
        let state = match &memo.state {
            Some(prev) if **prev == next => prev.clone(),
            _ => Rc::new(next),
        };
        memo.source = Some(source);
        memo.state = Some(state.clone());
        state
    }

    /// Effective state of this widget as seen in `form`, without memoization.
    pub fn derive(&self, form: &FormState) -> WidgetState {
        let mut state = derive_widget_state(&self.0.schema, &self.0.defaults, form);
        state.parent = self.parent().map(|p| p.uid().to_string());
        state
    }

    /// Replace the local state of this occurrence with `f` applied to its effective state.
    pub fn update(&self, ac: &mut ActionContext, f: impl FnOnce(&mut WidgetState)) -> bool {
        let uid = self.uid().to_string();
        let this = self.clone();
        self.0.form.modify(ac, move |form| {
            let mut state = this.derive(form);
            f(&mut state);
            form.states.insert(uid, state);
        })
    }
    pub fn set_attr(&self, ac: &mut ActionContext, name: &str, value: Value) -> bool {
        if self.state().attrs.get(name) == Some(&value) {
            return false;
        }
        self.update(ac, |s| {
            s.attrs.set(name, value);
        })
    }

    pub fn attrs(&self) -> Attrs {
        self.state().attrs.clone()
    }
    pub fn is_hidden(&self) -> bool {
        self.state().attrs.hidden() || self.parent().is_some_and(Widget::is_hidden)
    }
    /// `true` if this widget, an ancestor, or the whole form is read-only.
    pub fn is_readonly(&self) -> bool {
        self.0.form.options().readonly
            || self.state().attrs.readonly()
            || self.parent().is_some_and(Widget::is_readonly)
    }

    pub fn value(&self) -> Option<Value> {
        let name = self.name()?;
        self.0.form.get().value(name).cloned()
    }
    /// Write the value of the field this widget is bound to.
    ///
    /// Nodes declaring `canDirty: false` never mark the form dirty.
    pub fn set_value(&self, ac: &mut ActionContext, value: Value, fire_on_change: bool) -> bool {
        let Some(name) = self.name() else {
            return false;
        };
        let options = SetValue {
            fire_on_change,
            mark_dirty: self.0.schema.can_dirty(),
        };
        self.0.form.set_field_value(ac, name, value, options)
    }
}
impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("uid", &self.uid())
            .field("name", &self.name())
            .finish()
    }
}
