//! Google Gemini `generateContent` adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::KestrelConfig;
use crate::error::KestrelError;
use crate::types::{FinishReason, Turn, Usage};

use super::http::{shared_client, status_to_error};
use super::{CompletionRequest, CompletionResponse, CompletionService, ToolCall};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Completion service backed by the Gemini REST API.
pub struct GeminiService {
    model: String,
    api_key: String,
    base_url: String,
}

impl GeminiService {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Build from config, using the configured default model.
    pub fn from_config(config: &KestrelConfig) -> Result<Self, KestrelError> {
        Self::for_model(config, config.default_model())
    }

    /// Build from config for a specific model.
    pub fn for_model(config: &KestrelConfig, model: &str) -> Result<Self, KestrelError> {
        let api_key = config.api_key().ok_or_else(|| {
            KestrelError::Configuration("Missing GEMINI_API_KEY or GOOGLE_API_KEY".into())
        })?;
        let service = Self::new(model, api_key);
        Ok(match config.base_url() {
            Some(url) => service.with_base_url(url),
            None => service,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let contents: Vec<Value> = request.history.iter().map(turn_to_content).collect();

        let mut body = Map::new();
        body.insert("contents".into(), Value::Array(contents));

        if let Some(ref sys) = request.system_instruction {
            body.insert(
                "systemInstruction".into(),
                json!({ "parts": [{ "text": sys }] }),
            );
        }

        let settings = &request.settings;
        let mut gen_config = Map::new();
        if let Some(max) = settings.max_tokens {
            gen_config.insert("maxOutputTokens".into(), max.into());
        }
        if let Some(temp) = settings.temperature {
            gen_config.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = settings.top_p {
            gen_config.insert("topP".into(), top_p.into());
        }
        if let Some(top_k) = settings.top_k {
            gen_config.insert("topK".into(), top_k.into());
        }
        if let Some(ref stops) = settings.stop_sequences {
            gen_config.insert("stopSequences".into(), json!(stops));
        }
        if let Some(ref mime) = settings.response_mime_type {
            gen_config.insert("responseMimeType".into(), mime.clone().into());
        }
        if !gen_config.is_empty() {
            body.insert("generationConfig".into(), Value::Object(gen_config));
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters.schema,
                    })
                })
                .collect();
            body.insert(
                "tools".into(),
                json!([{ "functionDeclarations": declarations }]),
            );
        }

        Value::Object(body)
    }
}

fn turn_to_content(turn: &Turn) -> Value {
    match turn {
        Turn::User { text } => json!({ "role": "user", "parts": [{ "text": text }] }),
        Turn::Model { text } => json!({ "role": "model", "parts": [{ "text": text }] }),
        Turn::ToolCall { name, arguments } => json!({
            "role": "model",
            "parts": [{ "functionCall": { "name": name, "args": arguments } }],
        }),
        Turn::ToolResult { name, result } => json!({
            "role": "function",
            "parts": [{
                "functionResponse": {
                    "name": name,
                    "response": { "content": result },
                }
            }],
        }),
    }
}

#[async_trait]
impl CompletionService for GeminiService {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, KestrelError> {
        let body = self.build_request_body(request);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        debug!(model = %self.model, turns = request.history.len(), "Gemini generateContent");

        let resp = shared_client()
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let data: GeminiResponse = resp.json().await?;

        let usage = data
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        let Some(candidate) = data.candidates.into_iter().next() else {
            debug!(model = %self.model, "Gemini returned no candidates");
            return Ok(CompletionResponse {
                usage,
                finish_reason: Some(FinishReason::ContentFilter),
                ..Default::default()
            });
        };

        let mut text: Option<String> = None;
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                text.get_or_insert_with(String::new).push_str(&t);
            }
            if let Some(fc) = part.function_call {
                tool_calls.push(ToolCall {
                    name: fc.name,
                    arguments: fc.args.unwrap_or_else(|| json!({})),
                });
            }
        }

        let finish_reason = match candidate.finish_reason.as_deref() {
            _ if !tool_calls.is_empty() => Some(FinishReason::ToolCalls),
            Some("STOP") => Some(FinishReason::Stop),
            Some("MAX_TOKENS") => Some(FinishReason::Length),
            Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") => {
                Some(FinishReason::ContentFilter)
            }
            Some(_) => Some(FinishReason::Error),
            None => None,
        };

        Ok(CompletionResponse {
            text,
            tool_calls,
            usage,
            finish_reason,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}
