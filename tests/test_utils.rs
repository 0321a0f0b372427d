#![allow(dead_code)]

use std::cell::RefCell;

use futures::{channel::oneshot, future::LocalBoxFuture};
use serde_json::{json, Value};
use sigform::*;

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

/// Sales order with a customer, a discount shown twice and order lines.
pub fn order_meta() -> FormMeta {
    serde_json::from_value(json!({
        "model": "com.sale.Order",
        "fields": {
            "name": {"name": "name", "type": "STRING"},
            "discount": {"name": "discount", "type": "DECIMAL"},
            "total": {"name": "total", "type": "DECIMAL"},
            "customer": {
                "name": "customer",
                "type": "MANY_TO_ONE",
                "target": "com.base.Partner",
                "targetName": "fullName"
            },
            "lines": {"name": "lines", "type": "ONE_TO_MANY", "target": "com.sale.Line"}
        },
        "view": {
            "type": "form",
            "items": [
                {"type": "panel-tabs", "items": [
                    {"type": "panel", "items": [
                        {"type": "field", "name": "discount", "uid": "discount-tab", "onChange": "compute-total"}
                    ]}
                ]},
                {"type": "panel", "items": [
                    {"type": "field", "name": "discount", "uid": "discount-dialog"},
                    {"type": "field", "name": "total", "uid": "total", "hideIf": "!discount"},
                    {"type": "field", "name": "customer", "uid": "customer", "viewer": {"fields": [{"name": "email"}]}}
                ]}
            ]
        }
    }))
    .unwrap()
}

/// Fetcher whose reads complete when the test resolves them, in request order.
#[derive(Default)]
pub struct DeferredFetcher {
    pending: RefCell<Vec<oneshot::Sender<Record>>>,
    requests: RefCell<Vec<(String, i64, Vec<String>)>>,
}

impl DeferredFetcher {
    pub fn resolve(&self, value: Value) {
        let tx = self.pending.borrow_mut().remove(0);
        let _ = tx.send(record(value));
    }
    pub fn requests(&self) -> Vec<(String, i64, Vec<String>)> {
        self.requests.take()
    }
}

impl Fetcher for DeferredFetcher {
    fn read_by_id(
        &self,
        model: &str,
        id: i64,
        fields: &[String],
    ) -> LocalBoxFuture<'static, Result<Record, FetchError>> {
        self.requests
            .borrow_mut()
            .push((model.to_string(), id, fields.to_vec()));
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().push(tx);
        let e = FetchError::new(model, id, "cancelled");
        Box::pin(async move { rx.await.map_err(|_| e) })
    }
}
