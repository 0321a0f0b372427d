use std::rc::Rc;

use serde_json::Value;

use crate::{
    core::ActionContext,
    notify::EvalContext,
    schema::ExprKind,
    value::{is_truthy, set_path},
    widget::{ErrorKind, Widget, WidgetState},
    FormState, Subscription,
};


/// Evaluates expression strings of a schema against a settle context.
pub trait Evaluator {
    fn eval(&self, expr: &str, cx: &EvalContext) -> Value;
}
impl<F: Fn(&str, &EvalContext) -> Value> Evaluator for F {
    fn eval(&self, expr: &str, cx: &EvalContext) -> Value {
        self(expr, cx)
    }
}

/// Local state of the widget `uid` in `draft`, created if absent.
fn local_state<'a>(
    draft: &'a mut FormState,
    uid: &str,
    name: Option<&str>,
    parent: Option<&str>,
) -> &'a mut WidgetState {
    draft.states.entry(uid.to_string()).or_insert_with(|| WidgetState {
        parent: parent.map(str::to_string),
        ..WidgetState::named(name)
    })
}

struct Target {
    uid: String,
    name: Option<String>,
    parent: Option<String>,
    invalid_message: String,
}
impl Target {
    fn set_attr(&self, draft: &mut FormState, attr: &str, value: Value) {
        let current = draft.states.get(&self.uid).and_then(|s| s.attrs.get(attr));
        if current == Some(&value) {
            return;
        }
        self.state(draft).attrs.set(attr, value);
    }
    fn set_invalid(&self, draft: &mut FormState, invalid: bool) {
        let current = draft
            .states
            .get(&self.uid)
            .and_then(|s| s.errors.get(&ErrorKind::Invalid));
        match (invalid, current) {
            (true, Some(message)) if *message == self.invalid_message => {}
            (true, _) => {
                let message = self.invalid_message.clone();
                self.state(draft).errors.insert(ErrorKind::Invalid, message);
            }
            (false, Some(_)) => {
                self.state(draft).errors.remove(&ErrorKind::Invalid);
            }
            (false, None) => {}
        }
    }
    fn set_value(&self, draft: &mut FormState, value: Value) {
        let Some(name) = &self.name else {
            return;
        };
        let value = draft.coerce(name, value);
        if !draft.holds(name, &value) {
            set_path(Rc::make_mut(&mut draft.record), name, value);
        }
    }
    fn state<'a>(&self, draft: &'a mut FormState) -> &'a mut WidgetState {
        local_state(draft, &self.uid, self.name.as_deref(), self.parent.as_deref())
    }
}

/// Evaluate the expressions of `widget` on every settle pass and write the results.
///
/// `bind` writes the field value without dirtying the form or firing `onChange`,
/// `showIf`/`hideIf` write `hidden`, `validIf` sets or clears `errors.invalid`, and the
/// other boolean expressions write their attribute. Unchanged results write nothing.
pub fn bind_expressions(
    ac: &mut ActionContext,
    widget: &Widget,
    evaluator: Rc<dyn Evaluator>,
) -> Subscription {
    let exprs: Vec<(ExprKind, String)> = ExprKind::ALL
        .iter()
        .filter_map(|&kind| Some((kind, widget.schema().expr(kind)?.to_string())))
        .collect();
    if exprs.is_empty() {
        return Subscription::empty();
    }
    let target = Target {
        uid: widget.uid().to_string(),
        name: widget.name().map(str::to_string),
        parent: widget.parent().map(|p| p.uid().to_string()),
        invalid_message: widget.form().options().invalid_message.clone(),
    };
    widget
        .form()
        .subscribe_to_record_changes(ac, move |cx, draft| {
            for (kind, expr) in &exprs {
                let result = evaluator.eval(expr, cx);
                match kind {
                    ExprKind::Bind => target.set_value(draft, result),
                    ExprKind::ValidIf => target.set_invalid(draft, !is_truthy(&result)),
                    kind => {
                        let Some(attr) = kind.attr() else {
                            continue;
                        };
                        let flag = is_truthy(&result) != (*kind == ExprKind::ShowIf);
                        target.set_attr(draft, attr, Value::Bool(flag));
                    }
                }
            }
        })
}
