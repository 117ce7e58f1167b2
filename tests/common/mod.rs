//! Shared test helpers and a scripted completion service.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use kestrel::engine::ConversationEngine;
use kestrel::error::KestrelError;
use kestrel::provider::{CompletionRequest, CompletionResponse, CompletionService};
use kestrel::tools::{FunctionTool, ToolDescriptor, ToolParameters};
use kestrel::types::Usage;

/// A completion service that replays queued responses and records every
/// request it receives.
pub struct ScriptedService {
    model_id: String,
    script: Mutex<VecDeque<Result<CompletionResponse, KestrelError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedService {
    pub fn new(model_id: &str) -> Arc<Self> {
        Arc::new(Self {
            model_id: model_id.to_string(),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue a final text answer.
    pub fn queue_text(&self, text: &str) -> &Self {
        let mut response = CompletionResponse::text(text);
        response.usage = Usage {
            input_tokens: 10,
            output_tokens: 20,
            total_tokens: 30,
        };
        self.script.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Queue a tool call request.
    pub fn queue_tool_call(&self, name: &str, args: serde_json::Value) -> &Self {
        let mut response = CompletionResponse::tool_call(name, args);
        response.usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        };
        self.script.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Queue a failure.
    pub fn queue_error(&self, error: KestrelError) -> &Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, KestrelError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CompletionResponse::text("Mock response")))
    }
}

/// A transient service failure.
pub fn server_error() -> KestrelError {
    KestrelError::api(503, "Service Unavailable")
}

/// Tool adding two integers.
pub fn add_tool() -> FunctionTool {
    FunctionTool::from_fn(
        ToolDescriptor::new("add", "Add two integers").with_parameters(
            ToolParameters::object()
                .integer("a", "First operand", true)
                .integer("b", "Second operand", true)
                .build(),
        ),
        |args| Ok(json!(args.get_i64("a")? + args.get_i64("b")?)),
    )
}

/// Engine over `service` with `add_tool` registered.
pub fn engine_with_add(service: Arc<ScriptedService>) -> ConversationEngine {
    ConversationEngine::builder(service)
        .with_tool(add_tool())
        .build()
        .unwrap()
}
