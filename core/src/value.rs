//! Property values stored on trackable objects.

use crate::types::ObjectId;
use serde::{Deserialize, Serialize};

/// One property value. `Object` is a reference to another trackable
/// object and is the only variant the graph walker descends into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Object(ObjectId),
}

impl Value {
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self { Value::Number(n as f64) }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self { Value::Number(n as f64) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self { Value::Object(id) }
}
