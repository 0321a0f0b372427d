use std::{
    any::Any,
    fmt::{self, Write},
    sync::{Arc, Mutex},
};

use assert_call::call;
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::{
    layer::{Context, SubscriberExt},
    Layer, Registry,
};

pub fn call_on_drop(s: &'static str) -> impl Any {
    struct OnDrop(&'static str);
    impl Drop for OnDrop {
        fn drop(&mut self) {
            call!("{}", self.0);
        }
    }
    OnDrop(s)
}

/// Events recorded while [`capture_logs`] ran, one line per event.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<String>>>);

impl LogCapture {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct LineVisitor<'a>(&'a mut String);

impl Visit for LineVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        } else {
            let _ = write!(self.0, "{}={value:?}", field.name());
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _cx: Context<'_, S>) {
        let mut line = format!("{} ", event.metadata().level());
        let mut fields = String::new();
        event.record(&mut LineVisitor(&mut fields));
        line.push_str(&fields);
        self.0.lock().unwrap().push(line);
    }
}

/// Run `f` with a subscriber that records every event emitted on this thread.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    let logs = LogCapture::default();
    let subscriber = Registry::default().with(logs.clone());
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, logs)
}
