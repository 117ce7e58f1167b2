//! Capability trait and closure-based function tools.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::types::ToolDescriptor;
use crate::error::KestrelError;

/// A named, schema-described unit of logic the model may invoke.
///
/// Implemented by local functions ([`FunctionTool`]) and by nested
/// conversation engines exposed as delegates; the registry treats both alike.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Descriptor advertised to the completion service.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute with the model-supplied arguments.
    async fn execute(&self, args: &ToolArguments) -> Result<serde_json::Value, KestrelError>;

    /// Tool name (must match what the model calls).
    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

type ToolHandler = dyn Fn(ToolArguments) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, KestrelError>> + Send>>
    + Send
    + Sync;

/// Closure-based capability for quick tool creation.
pub struct FunctionTool {
    descriptor: ToolDescriptor,
    handler: Arc<ToolHandler>,
}

impl FunctionTool {
    /// Create a tool from an async closure.
    pub fn new<F, Fut>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, KestrelError>> + Send + 'static,
    {
        Self {
            descriptor,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Create a tool from a plain synchronous function.
    pub fn from_fn<F>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(ToolArguments) -> Result<serde_json::Value, KestrelError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(descriptor, move |args| {
            let handler = handler.clone();
            async move { handler(args) }
        })
    }
}

#[async_trait]
impl Capability for FunctionTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &ToolArguments) -> Result<serde_json::Value, KestrelError> {
        (self.handler)(args.clone()).await
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.descriptor.name)
            .field("description", &self.descriptor.description)
            .finish()
    }
}
