//! Reactive form state for metadata-driven business forms.
//!
//! A [`Form`] owns the record being edited and the state of every widget showing it.
//! Writes go through an [`ActionContext`] provided by the [`Runtime`]; record changes are
//! coalesced into settle passes that re-evaluate expressions and validation.

pub mod action;
pub mod core;
mod error;
pub mod expr;
pub mod form;
pub mod notify;
mod options;
pub mod payload;
mod registry;
pub mod related;
pub mod schema;
mod subscription;
pub mod utils;
pub mod validation;
pub mod value;
pub mod widget;

pub use crate::core::{spawn_action, spawn_action_async, ActionContext, Runtime, Task, TaskKind};
pub use action::{ActionEvent, ActionExecutor, AttrChange, Lifecycle, ValueOp};
pub use error::*;
pub use expr::{bind_expressions, Evaluator};
pub use form::{Form, FormBuilder, FormMeta, FormState, SetValue};
pub use notify::{EvalContext, Scheduler};
pub use options::*;
pub use registry::*;
pub use related::{
    ensure_related, EnsureOptions, Fetcher, ReferenceValue, RelatedField, RelatedSpec,
};
pub use schema::{ExprKind, FieldType, Fields, Property, Schema};
pub use subscription::*;
pub use validation::bind_validation;
pub use value::Record;
pub use widget::{Attrs, ErrorKind, Widget, WidgetState};
