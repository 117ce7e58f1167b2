//! Schema-constrained answers: the JSON contracts embedded in typed-step
//! prompts and the strict parsing of the reply.

use serde_json::{json, Value};
use strum::Display;

use crate::error::KestrelError;

/// System instruction for the converter sub-agent.
pub const CONVERTER_INSTRUCTIONS: &str = "Another agent produces answers that must comply with a specific schema.
From time to time that agent produces results that do NOT exactly follow the schema; your task is to fix such cases.
Your input is a message from the other agent and the schema the answer must comply with.
If the message already complies with the schema, return it unchanged.
If it does not, do your best to convert the message so that it complies with the schema.
Construct the best answer you can, or return null if the message cannot be converted.
Your output must be JSON. Under NO circumstances print anything before or after the JSON, and never print code.
Do not wrap the output in ```json or ``` fences. Your output is used AS IS as a JSON response.";

/// The answer shapes a typed step can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TypedSchema {
    Boolean,
    Integer,
    Float,
    Char,
    StringArray,
}

impl TypedSchema {
    /// JSON contract: an object whose `content` field holds the answer.
    pub fn schema(self) -> Value {
        let content = match self {
            Self::Boolean => json!({ "type": "string", "enum": ["True", "False"] }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Float => json!({ "type": "number", "format": "float" }),
            Self::Char => json!({ "type": "string" }),
            Self::StringArray => json!({ "type": "array", "items": { "type": "string" } }),
        };
        json!({
            "type": "object",
            "properties": { "content": content },
        })
    }
}

/// Remove a markdown code fence wrapped around the whole reply.
///
/// Only a leading "```json" or "```" and a trailing "```" are removed, so
/// backticks inside string values survive.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// Strictly parse a reply and return its `content` field.
pub fn parse_content(raw: &str) -> Result<Value, KestrelError> {
    let cleaned = strip_code_fences(raw);
    let mut parsed: Value = serde_json::from_str(&cleaned)
        .map_err(|e| KestrelError::typed_conversion(format!("reply is not JSON: {e}"), raw))?;
    match parsed.get_mut("content") {
        Some(content) => Ok(content.take()),
        None => Err(KestrelError::typed_conversion(
            "reply has no `content` field",
            raw,
        )),
    }
}

/// A Rust type a typed step can produce.
pub trait TypedValue: Sized {
    const SCHEMA: TypedSchema;

    /// Cast the parsed `content` field. `raw` is the reply, kept for errors.
    fn from_content(content: Value, raw: &str) -> Result<Self, KestrelError>;

    /// Parse a full reply.
    fn from_reply(raw: &str) -> Result<Self, KestrelError> {
        Self::from_content(parse_content(raw)?, raw)
    }
}

impl TypedValue for bool {
    const SCHEMA: TypedSchema = TypedSchema::Boolean;

    fn from_content(content: Value, raw: &str) -> Result<Self, KestrelError> {
        match &content {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
            other => Err(KestrelError::typed_conversion(
                format!("expected True/False, got {other}"),
                raw,
            )),
        }
    }
}

impl TypedValue for i64 {
    const SCHEMA: TypedSchema = TypedSchema::Integer;

    fn from_content(content: Value, raw: &str) -> Result<Self, KestrelError> {
        let parsed = match &content {
            Value::Number(n) => n.as_i64().or_else(|| {
                // i64::MAX as f64 rounds up to 2^63, which is itself out of range
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .filter(|f| *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            KestrelError::typed_conversion(format!("expected an integer, got {content}"), raw)
        })
    }
}

impl TypedValue for f64 {
    const SCHEMA: TypedSchema = TypedSchema::Float;

    fn from_content(content: Value, raw: &str) -> Result<Self, KestrelError> {
        let parsed = match &content {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            KestrelError::typed_conversion(format!("expected a number, got {content}"), raw)
        })
    }
}

impl TypedValue for char {
    const SCHEMA: TypedSchema = TypedSchema::Char;

    fn from_content(content: Value, raw: &str) -> Result<Self, KestrelError> {
        let Value::String(s) = &content else {
            return Err(KestrelError::typed_conversion(
                format!("expected a single character, got {content}"),
                raw,
            ));
        };
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(KestrelError::typed_conversion(
                format!("expected a single character, got {s:?}"),
                raw,
            )),
        }
    }
}

impl TypedValue for Vec<String> {
    const SCHEMA: TypedSchema = TypedSchema::StringArray;

    fn from_content(content: Value, raw: &str) -> Result<Self, KestrelError> {
        serde_json::from_value(content).map_err(|e| {
            KestrelError::typed_conversion(format!("expected an array of strings: {e}"), raw)
        })
    }
}
