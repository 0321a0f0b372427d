use super::*;

#[test]
fn defaults() {
    let o = FormOptions::default();
    assert!(!o.readonly);
    assert_eq!(o.scheduling, Scheduling::Idle);
    assert_eq!(o.settle_delay(), Duration::from_millis(100));
    assert_eq!(o.invalid_message, "Invalid field");
    assert_eq!(o.required_message, "Field is required");
}

#[test]
fn from_json_fills_missing_fields() {
    let o = FormOptions::from_json(r#"{"readonly": true, "scheduling": "timer", "settleDelayMs": 20}"#)
        .unwrap();
    assert!(o.readonly);
    assert_eq!(o.scheduling, Scheduling::Timer);
    assert_eq!(o.settle_delay_ms, 20);
    assert_eq!(o.invalid_message, "Invalid field");
}

#[test]
fn from_json_rejects_unknown_scheduling() {
    assert!(FormOptions::from_json(r#"{"scheduling": "frame"}"#).is_err());
}

#[test]
fn scheduling_display() {
    assert_eq!(Scheduling::Timer.to_string(), "timer");
    assert_eq!("idle".parse::<Scheduling>().unwrap(), Scheduling::Idle);
}
