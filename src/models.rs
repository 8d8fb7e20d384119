use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DispatchError, Result};

/// A task body as submitted by an operator: an opaque JSON object the
/// coordinator never inspects beyond `type` and the `id` it assigns.
/// Agents and operators agree on the remaining shape out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Task(Map<String, Value>);

impl Task {
    /// Parses a submitted task body, requiring a `type` field.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = match value {
            Value::Object(obj) => obj,
            _ => {
                return Err(DispatchError::Validation(
                    "Task body must be a JSON object".into(),
                ))
            }
        };
        if !obj.contains_key("type") {
            return Err(DispatchError::Validation("Task type missing".into()));
        }
        Ok(Task(obj))
    }

    /// The empty sentinel task left in a queue slot after cancellation.
    pub fn sentinel() -> Self {
        Task(Map::new())
    }

    /// True if this is a cleared (cancelled) sentinel, not a real task.
    pub fn is_sentinel(&self) -> bool {
        self.0.is_empty()
    }

    /// Clears all fields in place, turning this into a sentinel. Used by
    /// the cancellation protocol to neutralise a task already sitting in
    /// a queue slot without being able to remove it from the middle of
    /// the FIFO.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn set_id(&mut self, id: u64) {
        self.0.insert("id".to_string(), Value::from(id));
    }

    pub fn id(&self) -> Option<u64> {
        self.0.get("id").and_then(Value::as_u64)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// The outcome of a single target's slot in a `submit` call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TargetOutcome {
    Delivered(Value),
    Error {
        error: bool,
        msg: String,
        target: String,
    },
}

impl TargetOutcome {
    pub fn error(target: impl Into<String>, msg: impl Into<String>) -> Self {
        TargetOutcome::Error {
            error: true,
            msg: msg.into(),
            target: target.into(),
        }
    }

    /// Attaches the `target` field to a delivered agent payload,
    /// defaulting `error` to `false` if the agent didn't set it.
    pub fn delivered(target: impl Into<String>, mut payload: Value) -> Self {
        if let Value::Object(ref mut obj) = payload {
            obj.entry("error").or_insert(Value::Bool(false));
            obj.insert("target".to_string(), Value::String(target.into()));
        }
        TargetOutcome::Delivered(payload)
    }
}
