//! Report document: a JSON object produced by the generator.

use crate::error::{ReportError, ReportResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportDocument(Map<String, Value>);

impl ReportDocument {
    /// Document sent back when generation fails
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value; only objects are documents
    pub fn from_value(value: Value) -> ReportResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ReportError::GenerationFailure(format!(
                "report document must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Compact UTF-8 JSON carried by the response signal
    pub fn to_payload(&self) -> String {
        // A map of JSON values always serializes
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
