//! View schema and field metadata consumed by forms.

use std::collections::BTreeMap;

use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{value::Record, widget::Attrs};


/// Server-side type of a field.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, FromStr, Serialize, Deserialize,
)]
#[display(style = "SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    #[default]
    String,
    Boolean,
    Integer,
    Long,
    Decimal,
    Date,
    Time,
    Datetime,
    Text,
    Binary,
    Enum,
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

const FIELD_WIDGETS: &[(FieldType, &[&str])] = &[
    (
        FieldType::Boolean,
        &["boolean-select", "boolean-radio", "boolean-switch", "inline-checkbox", "toggle"],
    ),
    (FieldType::Integer, &["duration", "progress", "rating"]),
    (FieldType::Datetime, &["relative-time"]),
    (FieldType::Text, &["code-editor", "html"]),
    (
        FieldType::ManyToOne,
        &["binary-link", "image", "suggest-box", "drawing", "tag"],
    ),
    (FieldType::ManyToMany, &["tags", "tag-select"]),
];

impl FieldType {
    /// Parse a kebab-case name such as `many-to-one`.
    pub fn from_kebab(name: &str) -> Option<Self> {
        name.replace('-', "_").to_uppercase().parse().ok()
    }
    /// Server type implied by a widget name, if any.
    pub fn from_widget(widget: &str) -> Option<Self> {
        Self::from_kebab(widget).or_else(|| {
            FIELD_WIDGETS
                .iter()
                .find(|(_, widgets)| widgets.contains(&widget))
                .map(|(kind, _)| *kind)
        })
    }
    pub fn to_kebab(self) -> String {
        self.to_string().to_lowercase().replace('_', "-")
    }
    pub fn is_reference(self) -> bool {
        matches!(self, FieldType::OneToOne | FieldType::ManyToOne)
    }
    pub fn is_collection(self) -> bool {
        matches!(self, FieldType::OneToMany | FieldType::ManyToMany)
    }
    pub fn is_relation(self) -> bool {
        self.is_reference() || self.is_collection()
    }
    /// Relations whose targets are saved on their own rather than with the owning record.
    pub fn is_independent(self) -> bool {
        matches!(
            self,
            FieldType::ManyToOne | FieldType::OneToOne | FieldType::ManyToMany
        )
    }
}

/// Server-declared metadata of one field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    pub target: Option<String>,
    pub target_name: Option<String>,
    pub title: Option<String>,
    pub required: bool,
    pub readonly: bool,
    pub hidden: bool,
    pub image: bool,
    pub json: bool,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub min_size: Option<Value>,
    pub max_size: Option<Value>,
    pub pattern: Option<String>,
    pub default_value: Option<Value>,
}
impl Property {
    /// Attributes this field contributes to every schema node bound to it.
    pub fn default_attrs(&self) -> Attrs {
        let mut attrs = Attrs::new();
        for (name, flag) in [
            ("required", self.required),
            ("readonly", self.readonly),
            ("hidden", self.hidden),
        ] {
            if flag {
                attrs.set(name, Value::Bool(true));
            }
        }
        let optional = [
            ("title", self.title.clone().map(Value::String)),
            ("min", self.min.clone()),
            ("max", self.max.clone()),
            ("minSize", self.min_size.clone()),
            ("maxSize", self.max_size.clone()),
            ("pattern", self.pattern.clone().map(Value::String)),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                attrs.set(name, value);
            }
        }
        attrs
    }
}

/// Field metadata of one model.
pub type Fields = BTreeMap<String, Property>;

/// Inline editor of a relation field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Editor {
    pub items: Vec<Schema>,
    pub fields: Option<Fields>,
}

/// Read-only template viewer of a relation field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Viewer {
    pub template: Option<String>,
    pub fields: Vec<Property>,
}

/// One node of a view schema tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Schema {
    pub uid: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub widget: Option<String>,
    pub server_type: Option<FieldType>,
    pub target: Option<String>,
    pub target_name: Option<String>,
    pub editable: bool,
    pub on_change: Option<String>,
    pub depends: Option<String>,
    pub related: Option<String>,
    pub items: Vec<Schema>,
    pub editor: Option<Editor>,
    pub viewer: Option<Viewer>,
    pub fields: Option<Fields>,
    pub widget_attrs: Record,
    #[serde(flatten)]
    pub props: Record,
}

/// Expression-valued properties of a schema node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display(style = "camelCase")]
pub enum ExprKind {
    Bind,
    ShowIf,
    HideIf,
    ReadonlyIf,
    RequiredIf,
    ValidIf,
    CollapseIf,
    CanNew,
    CanEdit,
    CanView,
    CanSave,
    CanCopy,
    CanRemove,
    CanDelete,
    CanArchive,
    CanAttach,
    CanSelect,
}
impl ExprKind {
    pub const ALL: [ExprKind; 17] = [
        ExprKind::Bind,
        ExprKind::ShowIf,
        ExprKind::HideIf,
        ExprKind::ReadonlyIf,
        ExprKind::RequiredIf,
        ExprKind::ValidIf,
        ExprKind::CollapseIf,
        ExprKind::CanNew,
        ExprKind::CanEdit,
        ExprKind::CanView,
        ExprKind::CanSave,
        ExprKind::CanCopy,
        ExprKind::CanRemove,
        ExprKind::CanDelete,
        ExprKind::CanArchive,
        ExprKind::CanAttach,
        ExprKind::CanSelect,
    ];

    /// Attribute written with the boolean result, `None` for `bind` and `validIf`.
    pub fn attr(self) -> Option<&'static str> {
        Some(match self {
            ExprKind::Bind | ExprKind::ValidIf => return None,
            ExprKind::ShowIf | ExprKind::HideIf => "hidden",
            ExprKind::ReadonlyIf => "readonly",
            ExprKind::RequiredIf => "required",
            ExprKind::CollapseIf => "collapse",
            ExprKind::CanNew => "canNew",
            ExprKind::CanEdit => "canEdit",
            ExprKind::CanView => "canView",
            ExprKind::CanSave => "canSave",
            ExprKind::CanCopy => "canCopy",
            ExprKind::CanRemove => "canRemove",
            ExprKind::CanDelete => "canDelete",
            ExprKind::CanArchive => "canArchive",
            ExprKind::CanAttach => "canAttach",
            ExprKind::CanSelect => "canSelect",
        })
    }
}

/// Schema properties that become widget attributes.
pub const DEFAULT_ATTRS: &[&str] = &[
    "hidden",
    "readonly",
    "required",
    "title",
    "domain",
    "focus",
    "collapse",
    "precision",
    "scale",
    "prompt",
    "placeholder",
    "help",
    "icon",
    "css",
    "active",
    "url",
    "min",
    "max",
    "minSize",
    "maxSize",
    "pattern",
    "showTitle",
    "canNew",
    "canEdit",
    "canView",
    "canSave",
    "canCopy",
    "canRemove",
    "canDelete",
    "canArchive",
    "canAttach",
    "canSelect",
    "canMove",
];

impl Schema {
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.widget_attrs.get(name).or_else(|| self.props.get(name))
    }
    pub fn set_prop(&mut self, name: &str, value: Value) {
        self.props.insert(name.to_string(), value);
    }

    /// The expression string for `kind`, if the node declares one.
    ///
    /// `canXxx` properties may also hold plain booleans, those are static attributes instead.
    pub fn expr(&self, kind: ExprKind) -> Option<&str> {
        self.prop(&kind.to_string()).and_then(Value::as_str)
    }

    /// Static attributes declared by this node, `widgetAttrs` winning over plain properties.
    pub fn default_attrs(&self) -> Attrs {
        let mut attrs = Attrs::new();
        for source in [&self.props, &self.widget_attrs] {
            for (name, value) in source {
                if !DEFAULT_ATTRS.contains(&name.as_str()) {
                    continue;
                }
                if name.starts_with("can") && value.is_string() {
                    continue;
                }
                attrs.set(name.clone(), value.clone());
            }
        }
        attrs
    }

    pub fn is_field(&self) -> bool {
        self.kind == "field" || self.kind == "panel-related"
    }

    pub fn server_type(&self) -> FieldType {
        self.server_type.unwrap_or_default()
    }
    pub fn widget(&self) -> &str {
        self.widget.as_deref().unwrap_or(&self.kind)
    }

    /// Whether this node may mark its form dirty when its value changes.
    pub fn can_dirty(&self) -> bool {
        self.prop("canDirty").and_then(Value::as_bool) != Some(false)
    }

    /// Visit this node and every descendant, including editor items.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Schema)) {
        f(self);
        for item in &self.items {
            item.walk(f);
        }
        if let Some(editor) = &self.editor {
            for item in &editor.items {
                item.walk(f);
            }
        }
    }
}

/// Source of `uid`s for nodes that declare none. Each form owns one.
#[derive(Debug, Default)]
pub struct UidGen(usize);

impl UidGen {
    pub fn new() -> Self {
        Self::default()
    }
    fn next(&mut self) -> String {
        self.0 += 1;
        format!("w{}", self.0)
    }
}

const EMAIL_PATTERN: &str =
    r"^[a-zA-Z0-9.!#$%&'*+\/=?^_`{|}~-]+@([a-zA-Z0-9-]+\.)+[a-zA-Z0-9]{2,}$";

fn server_type_of(schema: &Schema, field: Option<&Property>) -> Option<FieldType> {
    if let Some(field) = field {
        return Some(field.kind);
    }
    match schema.kind.as_str() {
        "field" => Some(
            schema
                .server_type
                .or_else(|| schema.widget.as_deref().and_then(FieldType::from_widget))
                .unwrap_or_default(),
        ),
        "panel-related" => Some(schema.server_type.unwrap_or(FieldType::OneToMany)),
        _ => schema.server_type,
    }
}

fn widget_of(schema: &Schema, field: Option<&Property>) -> String {
    if let Some(widget) = &schema.widget {
        return widget.clone();
    }
    if field.is_some_and(|f| f.image) {
        return "image".into();
    }
    match (schema.kind.as_str(), schema.server_type) {
        ("field", Some(kind)) => kind.to_kebab(),
        _ => schema.kind.clone(),
    }
}

/// Prepare a raw view schema for use by a form.
///
/// Field metadata fills in missing attributes, every node gets a `uid`, a server type
/// and a widget, and nodes with visibility expressions start hidden until evaluated.
pub fn process_view(
    schema: &Schema,
    fields: &Fields,
    parent: Option<&Schema>,
    uids: &mut UidGen,
) -> Schema {
    let field = schema.name.as_ref().and_then(|name| fields.get(name));
    let mut res = schema.clone();

    if let Some(field) = field {
        for (name, value) in field.default_attrs().iter() {
            if !res.props.contains_key(name) {
                res.props.insert(name.clone(), value.clone());
            }
        }
        if res.target.is_none() {
            res.target = field.target.clone();
        }
        if res.target_name.is_none() {
            res.target_name = field.target_name.clone();
        }
    }

    res.server_type = server_type_of(&res, field);
    if res.uid.is_empty() {
        res.uid = uids.next();
    }
    if let Some(widget) = &res.widget {
        res.widget_attrs
            .insert("widget".into(), Value::String(widget.clone()));
    }
    res.widget = Some(widget_of(&res, field));

    let widget = res.widget().to_string();
    if widget == "progress" {
        for (name, default) in [("minSize", 0), ("maxSize", 100)] {
            res.props.entry(name).or_insert(Value::from(default));
        }
    }

    let in_collection = parent
        .and_then(|p| p.server_type)
        .is_some_and(FieldType::is_collection);
    let is_tabs = res.kind == "panel-tabs";
    let has_visibility =
        res.expr(ExprKind::ShowIf).is_some() || res.expr(ExprKind::HideIf).is_some();
    if has_visibility && !in_collection && !is_tabs {
        res.set_prop("hidden", Value::Bool(true));
        if res.widget_attrs.contains_key("hidden") {
            res.widget_attrs.insert("hidden".into(), Value::Bool(true));
        }
    }

    if res.is_field()
        && res.expr(ExprKind::ReadonlyIf).is_some()
        && parent.is_some_and(|p| p.editable)
    {
        res.set_prop("readonly", Value::Bool(true));
    }

    if is_tabs {
        for item in res.items.iter_mut().filter(|item| item.kind == "panel") {
            item.props
                .entry("showTitle")
                .or_insert(Value::Bool(false));
        }
    }

    if widget == "email" {
        res.set_prop("pattern", Value::String(EMAIL_PATTERN.into()));
    }

    let nested = res.fields.clone();
    let child_fields = nested.as_ref().unwrap_or(fields);
    let items: Vec<_> = res
        .items
        .iter()
        .map(|item| process_view(item, child_fields, Some(&res), uids))
        .collect();
    res.items = items;
    res
}

/// Field names a view needs, and for each relation field the dotted names its
/// editors, viewers and dependent widgets read from the related record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewFields {
    pub fields: Vec<String>,
    pub related: BTreeMap<String, Vec<String>>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|x| x == value) {
        list.push(value.to_string());
    }
}

/// `targetName` of `item` when it differs from the one declared in `fields`.
fn non_default_target_name<'a>(item: &'a Schema, fields: Option<&Fields>) -> Option<&'a str> {
    let name = item.name.as_deref()?;
    let target_name = item.target_name.as_deref()?;
    let declared = fields?.get(name)?.target_name.as_deref()?;
    (declared != target_name).then_some(target_name)
}

impl ViewFields {
    fn collect(&mut self, item: &Schema) -> &mut Vec<String> {
        match (&item.name, &item.target) {
            (Some(name), Some(_)) => self.related.entry(name.clone()).or_default(),
            _ => &mut self.fields,
        }
    }
    fn accept_editor(&mut self, item: &Schema, editor: &Editor) {
        fn accept_items(collect: &mut Vec<String>, items: &[Schema], editor_fields: Option<&Fields>) {
            for child in items {
                if let (Some(name), "field") = (&child.name, child.kind.as_str()) {
                    push_unique(collect, name);
                    if let Some(target_name) = non_default_target_name(child, editor_fields) {
                        push_unique(collect, &format!("{name}.{target_name}"));
                    }
                } else if child.kind == "panel" {
                    accept_items(collect, &child.items, editor_fields);
                }
                if child.widget.as_deref() == Some("ref-select") {
                    if let Some(related) = &child.related {
                        push_unique(collect, related);
                    }
                }
                if let Some(depends) = &child.depends {
                    for name in depends.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        push_unique(collect, name);
                    }
                }
            }
        }
        let collect = self.collect(item);
        accept_items(collect, &editor.items, editor.fields.as_ref());
    }
    fn accept_viewer(&mut self, item: &Schema, viewer: &Viewer) {
        let collect = self.collect(item);
        for field in &viewer.fields {
            push_unique(collect, &field.name);
        }
    }
}

/// Collect the fields used by `view`.
pub fn find_related(view: &Schema, fields: &Fields) -> ViewFields {
    let mut result = ViewFields::default();
    find_related_into(view, fields, &mut result);
    result
}

fn find_related_into(view: &Schema, fields: &Fields, result: &mut ViewFields) {
    for item in &view.items {
        if let Some(editor) = &item.editor {
            result.accept_editor(item, editor);
        }
        if let Some(viewer) = &item.viewer {
            result.accept_viewer(item, viewer);
        }
        match (&item.name, item.kind.as_str()) {
            (Some(name), "panel-related") => push_unique(&mut result.fields, name),
            _ if !item.items.is_empty() => find_related_into(item, fields, result),
            (Some(name), "field") => {
                push_unique(&mut result.fields, name);
                if let Some(target_name) = non_default_target_name(item, Some(fields)) {
                    push_unique(result.related.entry(name.clone()).or_default(), target_name);
                }
            }
            _ => {}
        }
    }
}
