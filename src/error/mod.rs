//! Error types for kestrel.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

use crate::types::Turn;

/// Primary error type for all kestrel operations.
#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The per-send tool-call ceiling was exceeded. Carries the session
    /// history as it stood when the limit tripped.
    #[error("Exceeded function call limit: {limit}")]
    TooManyToolCalls { limit: usize, history: Vec<Turn> },

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Typed conversion error: {message} (raw answer: {raw})")]
    TypedConversion { message: String, raw: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl KestrelError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn typed_conversion(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::TypedConversion {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::TypedConversion { .. } => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::TooManyToolCalls { .. } => ErrorCategory::CallLimit,
            Self::Workflow(_) => ErrorCategory::Workflow,
            Self::Io(_) | Self::Storage(_) => ErrorCategory::Storage,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is a transient service failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Whether this is the call-limit error. It is never retried.
    pub fn is_call_limit(&self) -> bool {
        matches!(self, Self::TooManyToolCalls { .. })
    }

    /// History attached to a call-limit error.
    pub fn call_history(&self) -> Option<&[Turn]> {
        match self {
            Self::TooManyToolCalls { history, .. } => Some(history),
            _ => None,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Network => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Server => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::CallLimit => RecoverySuggestion::RaiseCallLimit,
            ErrorCategory::Serialization => RecoverySuggestion::RephrasePrompt,
            ErrorCategory::Workflow => RecoverySuggestion::RephrasePrompt,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

// The request URL is dropped: errors end up in logs and URLs may carry keys.
impl From<reqwest::Error> for KestrelError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.without_url())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, KestrelError>;
