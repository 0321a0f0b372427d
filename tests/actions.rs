mod test_utils;

use self::test_utils::*;
use futures::future::LocalBoxFuture;
use serde_json::{json, Value};
use sigform::*;
use std::rc::Rc;

#[test]
fn numeric_relation_shorthand_becomes_reference() {
    let mut rt = Runtime::new();
    let form = Form::new(order_meta(), record(json!({})));
    let events = ActionEvent::from_json(r#"{"type": "value", "op": "set", "target": "customer", "value": 5}"#)
        .unwrap();
    form.actions().apply_all(rt.ac(), &events);
    assert_eq!(form.get().value("customer"), Some(&json!({"id": 5})));
}

#[test]
fn readonly_attr_reaches_every_occurrence() {
    let mut rt = Runtime::new();
    let form = Form::new(order_meta(), record(json!({})));
    let tab = form.widget("discount-tab", None).unwrap();
    let dialog = form.widget("discount-dialog", None).unwrap();

    let events = ActionEvent::from_json(
        r#"{"type": "attrs", "attrs": [{"target": "discount", "name": "readonly", "value": true}]}"#,
    )
    .unwrap();
    form.actions().apply_all(rt.ac(), &events);
    assert!(tab.is_readonly());
    assert!(dialog.is_readonly());

    rt.update();
    assert!(tab.is_readonly());
    assert!(dialog.is_readonly());

    form.actions()
        .apply(rt.ac(), &ActionEvent::attr("discount", "readonly", json!(false)));
    assert!(!tab.is_readonly());
    assert!(!dialog.is_readonly());
}

/// `compute-total` sets `total` to ten times the discount and locks it.
struct Sales;
impl ActionExecutor for Sales {
    fn execute(&self, action: &str, context: Record) -> LocalBoxFuture<'static, Vec<ActionEvent>> {
        let events = match action {
            "compute-total" => {
                let discount = context.get("discount").and_then(Value::as_i64).unwrap_or(0);
                vec![
                    ActionEvent::value(ValueOp::Set, "total", json!(discount * 10)),
                    ActionEvent::attr("total", "readonly", json!(true)),
                ]
            }
            _ => Vec::new(),
        };
        Box::pin(async move { events })
    }
}

#[test]
fn on_change_runs_business_logic() {
    let mut rt = Runtime::new();
    let form = Form::new(order_meta(), record(json!({})));
    form.actions().set_executor(Rc::new(Sales));
    let discount = form.widget("discount-dialog", None).unwrap();
    discount.set_value(rt.ac(), json!(3), true);
    rt.update();

    let state = form.get();
    assert_eq!(state.value("total"), Some(&json!(30)));
    assert!(state.dirty);
    assert!(form.widget("total", None).unwrap().is_readonly());
}
