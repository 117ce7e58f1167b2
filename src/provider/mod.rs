//! Completion service trait and implementations.

pub mod http;

#[cfg(feature = "gemini")]
pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KestrelError;
use crate::tools::ToolDescriptor;
use crate::types::{FinishReason, GenerationSettings, Turn, Usage};

#[cfg(feature = "gemini")]
pub use gemini::GeminiService;

/// A request sent to a completion service.
///
/// `history` already ends with the newest user or tool-result turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_instruction: Option<String>,
    pub history: Vec<Turn>,
    pub tools: Vec<ToolDescriptor>,
    pub settings: GenerationSettings,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Response from a completion service: either final text or tool calls.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    /// Final text, if the service produced any.
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

impl CompletionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_calls: vec![ToolCall {
                name: name.into(),
                arguments,
            }],
            finish_reason: Some(FinishReason::ToolCalls),
            ..Default::default()
        }
    }
}

/// The hosted model, consumed as a capability.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Model identifier, used for usage accounting.
    fn model_id(&self) -> &str;

    /// Produce the next response for the given history.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, KestrelError>;
}
