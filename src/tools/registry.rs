//! Name → capability lookup and the guarded invocation boundary.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::arguments::ToolArguments;
use super::capability::Capability;
use super::types::ToolDescriptor;
use super::validation::validate_arguments;
use crate::error::KestrelError;

/// Payload returned when the model names a tool that is not registered.
pub const FUNCTION_NOT_FOUND: &str = "Function not found";

/// Registered capabilities, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Names must be unique.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<(), KestrelError> {
        let name = capability.name().to_string();
        if name.trim().is_empty() {
            return Err(KestrelError::Configuration(
                "tool name must not be empty".into(),
            ));
        }
        if self.index.contains_key(&name) {
            return Err(KestrelError::Configuration(format!(
                "tool '{name}' is already registered"
            )));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(capability);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Descriptors advertised to the completion service.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name.
    ///
    /// Never fails: unknown tools, argument violations, handler errors and
    /// handler panics all come back as `{"error": ...}` payloads so the
    /// conversation can continue.
    pub async fn invoke(&self, name: &str, args: &Value) -> Value {
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "Tool not found");
            return json!({ "error": FUNCTION_NOT_FOUND });
        };

        debug!(tool = name, args = %args, "Invoking tool");

        if let Err(reason) = validate_arguments(args, &tool.descriptor().parameters.schema) {
            return failure("Invalid arguments for function", name, &reason);
        }

        let arguments = ToolArguments::new(args.clone());
        match AssertUnwindSafe(tool.execute(&arguments)).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(KestrelError::InvalidArgument(reason))) => {
                failure("Invalid arguments for function", name, &reason)
            }
            Ok(Err(e)) => failure("Value error during function call", name, &e.to_string()),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".to_string());
                failure("Unexpected error during function call", name, &reason)
            }
        }
    }
}

fn failure(kind: &str, name: &str, reason: &str) -> Value {
    let trace = Backtrace::force_capture();
    let message = format!("{kind} {name}: {reason}\n{trace}");
    error!(tool = name, error = reason, "{kind} {name}");
    json!({ "error": message })
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
