use super::*;
use crate::{form::SetValue, options::FormOptions, options::Scheduling, Runtime};
use assert_call::{call, CallRecorder};
use serde_json::json;
use std::time::Instant;

fn form() -> Form {
    Form::new(FormMeta::new("com.Order"), Record::new())
}

#[test]
fn subscribe_runs_listener_immediately() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let form = form();
    let _s = form.subscribe_to_record_changes(rt.ac(), |cx, _| call!("{}", cx.model()));
    cr.verify("com.Order");
    assert_eq!(form.notifier().listener_count(), 1);
    assert_eq!(form.notifier().settle_count(), 0);
}

#[test]
fn writes_are_coalesced_into_one_settle() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let form = form();
    let _s = form.subscribe_to_record_changes(rt.ac(), |cx, _| {
        call!("{}", cx.get("n").cloned().unwrap_or_default())
    });
    cr.verify("null");

    for n in 1..=5 {
        form.set_field_value(rt.ac(), "n", json!(n), SetValue::default());
    }
    cr.verify(());
    rt.update();
    cr.verify("5");
    assert_eq!(form.notifier().settle_count(), 1);
}

#[test]
fn listener_writes_are_committed_once() {
    let mut rt = Runtime::new();
    let form = form();
    let _a = form.subscribe_to_record_changes(rt.ac(), |cx, draft| {
        let total = cx.get("qty").and_then(Value::as_i64).unwrap_or(0) * 2;
        crate::value::set_path(Rc::make_mut(&mut draft.record), "total", json!(total));
    });
    let _b = form.subscribe_to_record_changes(rt.ac(), |_, draft| {
        draft.state_by_name("total").attrs.set("readonly", json!(true));
    });
    rt.update();
    let settles = form.notifier().settle_count();

    form.set_field_value(rt.ac(), "qty", json!(4), SetValue::default());
    rt.update();
    assert_eq!(form.get().value("total"), Some(&json!(8)));
    assert!(form.widget_state("total").attrs.readonly());
    assert!(!form.notifier().is_pending());
    assert_eq!(form.notifier().settle_count(), settles + 2);
}

#[test]
fn settle_without_changes_keeps_identity() {
    let mut rt = Runtime::new();
    let form = form();
    let _s = form.subscribe_to_record_changes(rt.ac(), |_, _| {});
    form.set_field_value(rt.ac(), "a", json!(1), SetValue::default());
    let before = form.get();
    rt.update();
    assert_eq!(form.notifier().settle_count(), 1);
    assert!(Rc::ptr_eq(&before, &form.get()));
}

#[test]
fn dropped_subscription_stops_listener() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let form = form();
    let s = form.subscribe_to_record_changes(rt.ac(), |_, _| call!("run"));
    cr.verify("run");
    drop(s);
    assert_eq!(form.notifier().listener_count(), 0);
    form.set_field_value(rt.ac(), "a", json!(1), SetValue::default());
    rt.update();
    cr.verify(());
}

#[test]
fn flush_runs_pending_settle_now() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let form = form();
    let _s = form.subscribe_to_record_changes(rt.ac(), |cx, _| {
        call!("{}", cx.get("a").cloned().unwrap_or_default())
    });
    cr.verify("null");
    form.set_field_value(rt.ac(), "a", json!(1), SetValue::default());
    form.notifier().flush(rt.ac());
    cr.verify("1");
    rt.update();
    cr.verify(());
}

#[test]
fn dropping_form_cancels_pending_settle() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let form = form();
    let _s = form.subscribe_to_record_changes(rt.ac(), |_, _| call!("run"));
    cr.verify("run");
    form.set_field_value(rt.ac(), "a", json!(1), SetValue::default());
    drop(form);
    rt.update();
    cr.verify(());
}

#[test]
fn cancelled_handle_skips_task() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let handle = IdleScheduler.schedule(Task::new(|_| call!("idle")));
    handle.cancel();
    assert!(handle.is_cancelled());
    rt.update();
    cr.verify(());

    IdleScheduler.schedule(Task::new(|_| call!("idle")));
    rt.update();
    cr.verify("idle");
}

#[test]
fn timer_scheduling_waits_for_delay() {
    let mut rt = Runtime::new();
    let options = FormOptions {
        scheduling: Scheduling::Timer,
        settle_delay_ms: 20,
        ..FormOptions::default()
    };
    let form = Form::builder(FormMeta::new("com.Order")).options(options).build();
    let _s = form.subscribe_to_record_changes(rt.ac(), |_, _| {});
    let start = Instant::now();
    form.set_field_value(rt.ac(), "a", json!(1), SetValue::default());
    rt.update();
    assert_eq!(form.notifier().settle_count(), 0);
    while form.notifier().settle_count() == 0 {
        futures::executor::block_on(rt.wait_for_ready());
        rt.update();
    }
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn eval_context_exposes_form() {
    let mut rt = Runtime::new();
    let form = Form::builder(FormMeta::new("com.Order"))
        .record(Record::from_iter([("a".to_string(), json!(1))]))
        .build();
    let _s = form.subscribe_to_record_changes(rt.ac(), |cx, draft| {
        assert_eq!(cx.values()["_model"], json!("com.Order"));
        assert_eq!(cx.record().get("a"), Some(&json!(1)));
        assert!(cx.fields().is_empty());
        assert!(!cx.readonly());
        assert!(Rc::ptr_eq(cx.record(), &draft.record));
    });
}
