use super::*;
use crate::{form::FormMeta, value::Record, widget::Attrs, Form, Runtime, SetValue};
use rstest::rstest;
use serde_json::json;

fn state(attrs: Value) -> WidgetState {
    WidgetState {
        attrs: serde_json::from_value::<Attrs>(attrs).unwrap(),
        ..WidgetState::default()
    }
}

fn kinds(errors: &Errors) -> Vec<ErrorKind> {
    errors.keys().copied().collect()
}

#[rstest]
#[case(json!({"required": true}), None, vec![ErrorKind::Required])]
#[case(json!({"required": true}), Some(json!("  ")), vec![ErrorKind::Required])]
#[case(json!({"required": true}), Some(json!([])), vec![ErrorKind::Required])]
#[case(json!({"required": true}), Some(json!(0)), vec![])]
#[case(json!({"required": true, "hidden": true}), None, vec![])]
#[case(json!({"min": 1, "max": 10}), Some(json!(0)), vec![ErrorKind::Min])]
#[case(json!({"min": 1, "max": 10}), Some(json!("12.5")), vec![ErrorKind::Max])]
#[case(json!({"min": 1, "max": 10}), Some(json!(5)), vec![])]
#[case(json!({"minSize": 2, "maxSize": 4}), Some(json!("a")), vec![ErrorKind::Min])]
#[case(json!({"minSize": 2, "maxSize": 4}), Some(json!("abcde")), vec![ErrorKind::Max])]
#[case(json!({"pattern": "^[0-9]+$"}), Some(json!("12a")), vec![ErrorKind::Pattern])]
#[case(json!({"pattern": "^[0-9]+$"}), Some(json!("123")), vec![])]
#[case(json!({"pattern": "("}), Some(json!("x")), vec![])]
fn validate_cases(#[case] attrs: Value, #[case] value: Option<Value>, #[case] expected: Vec<ErrorKind>) {
    let errors = validate(&state(attrs), value.as_ref(), &FormOptions::default());
    assert_eq!(kinds(&errors), expected);
}

#[test]
fn messages() {
    let options = FormOptions {
        required_message: "Required".into(),
        ..FormOptions::default()
    };
    let errors = validate(&state(json!({"required": true})), None, &options);
    assert_eq!(errors[&ErrorKind::Required], "Required");
    let errors = validate(&state(json!({"min": 2})), Some(&json!(1)), &options);
    assert_eq!(errors[&ErrorKind::Min], "Value must be at least 2");
}

fn form() -> Form {
    let meta: FormMeta = serde_json::from_value(json!({
        "model": "com.Contact",
        "fields": {
            "email": {"name": "email", "type": "STRING", "required": true},
            "age": {"name": "age", "type": "INTEGER", "min": 18}
        },
        "view": {
            "type": "form",
            "items": [
                {"type": "field", "name": "email", "uid": "email", "widget": "email"},
                {"type": "field", "name": "age", "uid": "age"}
            ]
        }
    }))
    .unwrap();
    Form::new(meta, Record::new())
}

#[test]
fn bound_validation_follows_value() {
    let mut rt = Runtime::new();
    let form = form();
    let email = form.widget("email", None).unwrap();
    let _s = bind_validation(rt.ac(), &email);
    assert_eq!(kinds(&form.widget_state("email").errors), [ErrorKind::Required]);
    assert!(!form.is_valid());

    form.set_field_value(rt.ac(), "email", json!("nope"), SetValue::default());
    rt.update();
    assert_eq!(kinds(&form.widget_state("email").errors), [ErrorKind::Pattern]);

    form.set_field_value(rt.ac(), "email", json!("a@b.com"), SetValue::default());
    rt.update();
    assert!(form.widget_state("email").errors.is_empty());
    assert!(form.is_valid());
}

#[test]
fn bound_validation_leaves_other_errors_alone() {
    let mut rt = Runtime::new();
    let form = form();
    let age = form.widget("age", None).unwrap();
    let _s = bind_validation(rt.ac(), &age);
    assert!(form.widget_state("age").errors.is_empty());

    form.modify(rt.ac(), |s| {
        let state = s.states.entry("age".into()).or_default();
        state.errors.insert(ErrorKind::Invalid, "Invalid field".into());
    });
    form.set_field_value(rt.ac(), "age", json!(12), SetValue::default());
    rt.update();
    assert_eq!(
        kinds(&form.widget_state("age").errors),
        [ErrorKind::Invalid, ErrorKind::Min]
    );

    form.set_field_value(rt.ac(), "age", json!(30), SetValue::default());
    rt.update();
    assert_eq!(kinds(&form.widget_state("age").errors), [ErrorKind::Invalid]);
}

#[test]
fn hidden_fields_are_not_validated() {
    let mut rt = Runtime::new();
    let form = form();
    let email = form.widget("email", None).unwrap();
    email.set_attr(rt.ac(), "hidden", json!(true));
    let _s = bind_validation(rt.ac(), &email);
    assert!(form.widget_state("email").errors.is_empty());
}
