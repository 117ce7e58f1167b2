//! Conversation turns and their serializable projection.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Role tag of a [`Turn`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TurnRole {
    User,
    Model,
    ToolCall,
    ToolResult,
}

/// One unit of conversation. Immutable once appended to a history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "kebab-case")]
pub enum Turn {
    User {
        text: String,
    },
    Model {
        text: String,
    },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        name: String,
        result: serde_json::Value,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::Model { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::ToolCall {
            name: name.into(),
            arguments,
        }
    }

    pub fn tool_result(name: impl Into<String>, result: serde_json::Value) -> Self {
        Self::ToolResult {
            name: name.into(),
            result,
        }
    }

    pub fn role(&self) -> TurnRole {
        match self {
            Self::User { .. } => TurnRole::User,
            Self::Model { .. } => TurnRole::Model,
            Self::ToolCall { .. } => TurnRole::ToolCall,
            Self::ToolResult { .. } => TurnRole::ToolResult,
        }
    }

    /// Text payload for user and model turns.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::User { text } | Self::Model { text } => Some(text),
            _ => None,
        }
    }

    /// Tool referenced by a tool-call or tool-result turn.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolCall { name, .. } | Self::ToolResult { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_tool_turn(&self) -> bool {
        self.tool_name().is_some()
    }
}

impl std::fmt::Display for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User { text } => write!(f, "user: {text}"),
            Self::Model { text } => write!(f, "model: {text}"),
            Self::ToolCall { name, arguments } => write!(f, "Function called: {name}({arguments})"),
            Self::ToolResult { name, result } => write!(f, "Function result: {name} -> {result}"),
        }
    }
}

/// Role + text record: the persisted form of a text turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerializableTurn {
    pub role: TurnRole,
    pub text: String,
}

impl SerializableTurn {
    /// Project a turn; tool turns have no serializable form.
    pub fn from_turn(turn: &Turn) -> Option<Self> {
        turn.text().map(|text| Self {
            role: turn.role(),
            text: text.to_string(),
        })
    }

    /// Restore a turn; records carrying a tool role are not restorable.
    pub fn into_turn(self) -> Option<Turn> {
        match self.role {
            TurnRole::User => Some(Turn::User { text: self.text }),
            TurnRole::Model => Some(Turn::Model { text: self.text }),
            TurnRole::ToolCall | TurnRole::ToolResult => None,
        }
    }
}
