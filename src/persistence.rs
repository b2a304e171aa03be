//! The persistence boundary: one async request/response function.
//!
//! Nothing in this crate retries a request. Retry policy, if any, belongs to
//! the [`Persistence`] implementation.

use std::cell::{Cell, RefCell};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{Error, Result, SessionConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Response {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Response {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Response {
            success: false,
            data: None,
            error: Some(ResponseError {
                message: message.into(),
            }),
        }
    }

    /// The response as a result; `fallback` names the failure when the
    /// backend gave no message.
    pub fn into_result(self, fallback: &str) -> Result<Option<Value>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(Error::Persistence(
                self.error
                    .map(|e| e.message)
                    .unwrap_or_else(|| fallback.to_string()),
            ))
        }
    }
}

/// The backend transport, seen as a single async function.
///
/// Operations are named `{feature}/{action}` with actions `create`, `read`,
/// `update`, `delete` and `list`. Create and update carry `{"data": entity}`,
/// read and delete carry `{"id": id}`, list carries nothing.
#[allow(async_fn_in_trait)]
pub trait Persistence {
    async fn send(&self, operation: &str, payload: Option<Value>) -> Response;
}

/// In-memory backend implementing the standard operations of one feature.
#[derive(Debug)]
pub struct MemoryBackend {
    config: SessionConfig,
    records: RefCell<AHashMap<String, Value>>,
    order: RefCell<Vec<String>>,
    next_id: Cell<u64>,
    calls: RefCell<Vec<String>>,
    failures: RefCell<AHashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new(config: &SessionConfig) -> Self {
        MemoryBackend {
            config: config.clone(),
            records: RefCell::new(AHashMap::new()),
            order: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            calls: RefCell::new(Vec::new()),
            failures: RefCell::new(AHashMap::new()),
        }
    }

    /// Seed a record directly, bypassing the operation log
    pub fn insert(&self, record: Value) {
        if let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) {
            if self.records.borrow_mut().insert(id.clone(), record).is_none() {
                self.order.borrow_mut().push(id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.records.borrow().get(id).cloned()
    }

    /// Make the next call to `action` fail with `message`
    pub fn fail_next(&self, action: &str, message: impl Into<String>) {
        self.failures
            .borrow_mut()
            .insert(self.config.operation(action), message.into());
    }

    /// Every operation received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, action: &str) -> usize {
        let operation = self.config.operation(action);
        self.calls.borrow().iter().filter(|c| **c == operation).count()
    }

    fn handle(&self, action: &str, payload: Option<Value>) -> Response {
        match action {
            "list" => {
                let records = self.records.borrow();
                let list = self
                    .order
                    .borrow()
                    .iter()
                    .filter_map(|id| records.get(id).cloned())
                    .collect::<Vec<Value>>();
                Response::ok(Value::Array(list))
            }
            "read" => match payload_id(&payload).and_then(|id| self.get(&id)) {
                Some(record) => Response::ok(record),
                None => Response::failure("Record not found"),
            },
            "create" => {
                let Some(mut record) = payload_data(payload) else {
                    return Response::failure("Missing data");
                };
                let id = record.get("id").and_then(Value::as_str).unwrap_or_default();
                if self.config.is_unsaved_id(id) {
                    let next = self.next_id.get();
                    self.next_id.set(next + 1);
                    record["id"] = json!(next.to_string());
                }
                self.insert(record.clone());
                Response::ok(record)
            }
            "update" => {
                let Some(record) = payload_data(payload) else {
                    return Response::failure("Missing data");
                };
                let id = record.get("id").and_then(Value::as_str).unwrap_or_default();
                if !self.records.borrow().contains_key(id) {
                    return Response::failure("Record not found");
                }
                self.insert(record.clone());
                Response::ok(record)
            }
            "delete" => match payload_id(&payload) {
                Some(id) if self.records.borrow_mut().remove(&id).is_some() => {
                    self.order.borrow_mut().retain(|existing| *existing != id);
                    Response::ok_empty()
                }
                _ => Response::failure("Record not found"),
            },
            other => Response::failure(format!("Unknown action: {}", other)),
        }
    }
}

impl Persistence for MemoryBackend {
    async fn send(&self, operation: &str, payload: Option<Value>) -> Response {
        self.calls.borrow_mut().push(operation.to_string());

        if let Some(message) = self.failures.borrow_mut().remove(operation) {
            return Response::failure(message);
        }

        match operation.split_once('/') {
            Some((feature, action)) if feature == self.config.feature => self.handle(action, payload),
            _ => Response::failure(format!("Unknown operation: {}", operation)),
        }
    }
}

fn payload_id(payload: &Option<Value>) -> Option<String> {
    payload
        .as_ref()
        .and_then(|p| p.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn payload_data(payload: Option<Value>) -> Option<Value> {
    payload
        .and_then(|mut p| p.get_mut("data").map(Value::take))
        .filter(Value::is_object)
}
