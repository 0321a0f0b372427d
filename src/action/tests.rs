use super::*;
use crate::{form::FormMeta, Runtime};
use assert_call::{call, CallRecorder};
use serde_json::json;

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

fn meta() -> FormMeta {
    serde_json::from_value(json!({
        "model": "com.Order",
        "fields": {
            "name": {"name": "name", "type": "STRING"},
            "discount": {"name": "discount", "type": "DECIMAL"},
            "customer": {"name": "customer", "type": "MANY_TO_ONE", "target": "com.Partner"},
            "lines": {"name": "lines", "type": "ONE_TO_MANY", "target": "com.Line"},
            "lines.product": {"name": "lines.product", "type": "MANY_TO_ONE", "target": "com.Product"},
            "attrs": {"name": "attrs", "type": "STRING", "json": true}
        },
        "view": {
            "type": "form",
            "items": [
                {"type": "field", "name": "discount", "uid": "tab"},
                {"type": "field", "name": "discount", "uid": "dialog"}
            ]
        }
    }))
    .unwrap()
}

fn form(value: Value) -> Form {
    Form::new(meta(), record(value))
}

#[test]
fn parse_events() {
    let events = ActionEvent::from_json(
        r#"[
            {"type": "attrs", "attrs": [{"target": "discount", "name": "readonly", "value": true}]},
            {"type": "value", "op": "add", "target": "lines", "value": [{"id": 1}]},
            {"type": "focus", "target": "name"},
            {"type": "close"}
        ]"#,
    )
    .unwrap();
    assert_eq!(
        events,
        [
            ActionEvent::attr("discount", "readonly", json!(true)),
            ActionEvent::value(ValueOp::Add, "lines", json!([{"id": 1}])),
            ActionEvent::Focus {
                target: "name".into()
            },
            ActionEvent::Close,
        ]
    );
    let single = ActionEvent::from_json(r#"{"type": "save"}"#).unwrap();
    assert_eq!(single, [ActionEvent::Save]);
}

#[test]
fn parse_error() {
    let e = ActionEvent::from_json(r#"{"type": "explode"}"#).unwrap_err();
    assert!(e.to_string().starts_with("invalid action event"));
    assert!(std::error::Error::source(&e).is_some());
}

#[test]
fn attrs_event_applies_to_every_occurrence() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    let tab = form.widget("tab", None).unwrap();
    let dialog = form.widget("dialog", None).unwrap();
    tab.set_attr(rt.ac(), "readonly", json!(false));

    form.actions()
        .apply(rt.ac(), &ActionEvent::attr("discount", "readonly", json!(true)));
    assert!(tab.state().attrs.readonly());
    assert!(dialog.state().attrs.readonly());

    form.actions()
        .apply(rt.ac(), &ActionEvent::attr("discount", "readonly", json!(false)));
    assert!(!tab.state().attrs.readonly());
    assert!(!dialog.state().attrs.readonly());
}

#[test]
fn error_and_refresh_attrs() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    let actions = form.actions();
    actions.apply(rt.ac(), &ActionEvent::attr("name", "error", json!("Too long")));
    let state = form.widget_state("name");
    assert_eq!(state.errors.get(&ErrorKind::Error).map(String::as_str), Some("Too long"));
    assert!(!form.is_valid());

    actions.apply(rt.ac(), &ActionEvent::attr("name", "error", json!("")));
    assert!(form.widget_state("name").errors.is_empty());

    actions.apply(rt.ac(), &ActionEvent::attr("customer", "refresh", Value::Null));
    actions.apply(rt.ac(), &ActionEvent::attr("customer", "refresh", Value::Null));
    assert_eq!(form.widget_state("customer").attrs.refresh(), 2);
}

#[test]
fn attrs_on_collection_column() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    form.actions()
        .apply(rt.ac(), &ActionEvent::attr("lines.price", "hidden", json!(true)));
    let state = form.widget_state("lines");
    assert!(state.column("price").unwrap().hidden());
    assert!(!state.attrs.hidden());
}

#[test]
fn attrs_without_target_are_ignored() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    let before = form.get();
    form.actions()
        .apply(rt.ac(), &ActionEvent::attr("", "hidden", json!(true)));
    form.actions()
        .apply(rt.ac(), &ActionEvent::value(ValueOp::Set, "", json!(1)));
    assert!(Rc::ptr_eq(&before, &form.get()));
}

#[test]
fn value_set_numeric_relation_becomes_reference() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    form.actions()
        .apply(rt.ac(), &ActionEvent::value(ValueOp::Set, "customer", json!(5)));
    assert_eq!(form.get().value("customer"), Some(&json!({"id": 5})));
    assert!(form.get().dirty);
}

#[test]
fn value_set_on_undeclared_name_is_not_dirty() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    form.actions()
        .apply(rt.ac(), &ActionEvent::value(ValueOp::Set, "preview", json!("x")));
    assert_eq!(form.get().value("preview"), Some(&json!("x")));
    assert!(!form.get().dirty);
}

#[test]
fn value_shorthand_in_attrs() {
    let mut rt = Runtime::new();
    let form = form(json!({"name": "a"}));
    form.actions()
        .apply(rt.ac(), &ActionEvent::attr("name", "value", json!("")));
    assert_eq!(form.get().value("name"), Some(&Value::Null));
    form.actions()
        .apply(rt.ac(), &ActionEvent::attr("lines", "value:add", json!({"id": 3})));
    assert_eq!(form.get().value("lines"), Some(&json!([{"id": 3}])));
}

#[test]
fn value_add_merges_rows_by_id() {
    let mut rt = Runtime::new();
    let form = form(json!({"lines": [{"id": 1, "qty": 1}, {"id": 2, "qty": 2}]}));
    form.actions().apply(
        rt.ac(),
        &ActionEvent::value(ValueOp::Add, "lines", json!([{"id": 2, "qty": 5}, 4])),
    );
    assert_eq!(
        form.get().value("lines"),
        Some(&json!([{"id": 1, "qty": 1}, {"id": 2, "qty": 5}, {"id": 4}]))
    );
}

#[test]
fn value_del_removes_rows_by_id() {
    let mut rt = Runtime::new();
    let form = form(json!({"lines": [{"id": 1}, {"id": 2}, {"id": 3}]}));
    form.actions().apply(
        rt.ac(),
        &ActionEvent::value(ValueOp::Del, "lines", json!([1, {"id": 3}])),
    );
    assert_eq!(form.get().value("lines"), Some(&json!([{"id": 2}])));
}

#[test]
fn value_set_on_collection_sub_path_updates_every_row() {
    let mut rt = Runtime::new();
    let form = form(json!({"lines": [{"id": 1, "qty": 1}, {"id": 2}]}));
    form.actions()
        .apply(rt.ac(), &ActionEvent::value(ValueOp::Set, "lines.qty", json!(0)));
    assert_eq!(
        form.get().value("lines"),
        Some(&json!([{"id": 1, "qty": 0}, {"id": 2, "qty": 0}]))
    );

    form.actions()
        .apply(rt.ac(), &ActionEvent::value(ValueOp::Set, "lines.product", json!(9)));
    assert_eq!(
        form.get().value("lines"),
        Some(&json!([
            {"id": 1, "qty": 0, "product": {"id": 9}},
            {"id": 2, "qty": 0, "product": {"id": 9}}
        ]))
    );
}

#[test]
fn record_event_merges_values() {
    let mut rt = Runtime::new();
    let form = form(json!({"name": "a", "discount": 1}));
    form.actions().apply(
        rt.ac(),
        &ActionEvent::Record {
            value: record(json!({"discount": 1, "$total": 10, "customer": 7})),
        },
    );
    let state = form.get();
    assert_eq!(state.value("$total"), Some(&json!(10)));
    assert_eq!(state.value("customer"), Some(&json!({"id": 7})));
    assert_eq!(state.value("name"), Some(&json!("a")));
    assert!(state.dirty);

    let form = self::form(json!({}));
    form.actions().apply(
        rt.ac(),
        &ActionEvent::Record {
            value: record(json!({"$total": 10})),
        },
    );
    assert!(!form.get().dirty);
}

#[test]
fn record_event_on_json_panel_writes_parent_field() {
    let mut rt = Runtime::new();
    let parent = form(json!({"attrs": null}));
    let mut child_meta = FormMeta::new("com.Order");
    child_meta.json_field = Some("attrs".into());
    child_meta.fields = serde_json::from_value(json!({
        "color": {"name": "color", "type": "STRING"}
    }))
    .unwrap();
    let child = Form::builder(child_meta).parent(&parent).build();

    child.actions().apply(
        rt.ac(),
        &ActionEvent::Record {
            value: record(json!({"color": "red", "$tmp": 1})),
        },
    );
    assert_eq!(parent.get().value("attrs"), Some(&json!(r#"{"color":"red"}"#)));
    assert!(parent.get().dirty);
}

#[test]
fn focus_event() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    form.actions().apply(
        rt.ac(),
        &ActionEvent::Focus {
            target: "name".into(),
        },
    );
    assert!(form.widget_state("name").attrs.focus());
}

#[test]
fn focus_again_after_blur() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    let tab = form.widget("tab", None).unwrap();
    let dialog = form.widget("dialog", None).unwrap();
    let focus = ActionEvent::Focus {
        target: "discount".into(),
    };

    form.actions().apply(rt.ac(), &focus);
    assert!(tab.state().attrs.focus());
    assert!(dialog.state().attrs.focus());

    tab.set_attr(rt.ac(), "focus", json!(false));
    assert!(!tab.state().attrs.focus());

    form.actions().apply(rt.ac(), &focus);
    assert!(tab.state().attrs.focus());
    assert_eq!(tab.state().attrs.focus_count(), 2);

    let before = tab.state();
    form.actions().apply(rt.ac(), &focus);
    let after = tab.state();
    assert!(!Rc::ptr_eq(&before, &after));
    assert_eq!(after.attrs.focus_count(), 3);
}

#[test]
fn lifecycle_events_run_handlers_and_observers() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let form = form(json!({}));
    let _o = form.actions().observe(|e| call!("observe {e:?}"));
    let _h = form.actions().on(Lifecycle::Save, || {
        Box::pin(async {
            call!("save");
        })
    });
    form.actions().apply(rt.ac(), &ActionEvent::Save);
    cr.verify("observe Save");
    rt.update();
    cr.verify("save");

    form.actions().apply(rt.ac(), &ActionEvent::Validate);
    rt.update();
    cr.verify("observe Validate");
}

struct Discount;
impl ActionExecutor for Discount {
    fn execute(&self, action: &str, context: Record) -> LocalBoxFuture<'static, Vec<ActionEvent>> {
        call!("{action}");
        let total = context.get("discount").and_then(Value::as_i64).unwrap_or(0) * 10;
        Box::pin(async move {
            vec![
                ActionEvent::value(ValueOp::Set, "$total", json!(total)),
                ActionEvent::attr("discount", "readonly", json!(true)),
            ]
        })
    }
}

#[test]
fn execute_applies_produced_events() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let form = form(json!({"discount": 3}));
    form.actions().set_executor(Rc::new(Discount));
    form.actions().execute("compute-total", None);
    cr.verify(());
    rt.update();
    cr.verify("compute-total");
    assert_eq!(form.get().value("$total"), Some(&json!(30)));
    assert!(form.widget_state("discount").attrs.readonly());
    assert!(!form.get().dirty);
}

#[test]
fn execute_without_executor_does_nothing() {
    let mut rt = Runtime::new();
    let form = form(json!({}));
    form.actions().execute("anything", Some("name"));
    rt.update();
    assert_eq!(rt.pending_async_actions(), 0);
}
