//! Convenience re-exports for common use.

pub use crate::config::KestrelConfig;
pub use crate::engine::{ConversationEngine, EngineBuilder, SendResult};
pub use crate::error::{KestrelError, Result};
pub use crate::history::History;
pub use crate::pipeline::{Chain, ChainBuilder, Pipeline, StepContext, StepOutput};
pub use crate::provider::{CompletionRequest, CompletionResponse, CompletionService};
pub use crate::scheduler::{Recurrence, Scheduler};
pub use crate::tools::{
    Capability, FunctionTool, ToolArguments, ToolDescriptor, ToolParameters, ToolRegistry,
};
pub use crate::types::{GenerationSettings, SerializableTurn, Turn, TurnRole, Usage};
pub use crate::util::retry::RetryPolicy;

#[cfg(feature = "gemini")]
pub use crate::provider::GeminiService;
