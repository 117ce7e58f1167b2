//! Typed access to tool call arguments.

use crate::error::KestrelError;

/// Wrapper around the argument mapping of a model's tool call.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, KestrelError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| KestrelError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer argument. Integral floats are accepted.
    pub fn get_i64(&self, key: &str) -> Result<i64, KestrelError> {
        self.value
            .get(key)
            .and_then(|v| {
                v.as_i64().or_else(|| {
                    v.as_f64()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
            })
            .ok_or_else(|| KestrelError::InvalidArgument(format!("Missing integer argument: {key}")))
    }

    /// Get a float argument.
    pub fn get_f64(&self, key: &str) -> Result<f64, KestrelError> {
        self.value
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| KestrelError::InvalidArgument(format!("Missing float argument: {key}")))
    }

    /// Get a boolean argument.
    pub fn get_bool(&self, key: &str) -> Result<bool, KestrelError> {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| KestrelError::InvalidArgument(format!("Missing boolean argument: {key}")))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, KestrelError> {
        let value = match &self.value {
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            KestrelError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}
