//! Multi-step workflows over conversation engines.
//!
//! [`Pipeline`] runs steps eagerly and threads history between them;
//! [`chain::Chain`] declares a step graph up front and runs it later.

pub mod chain;
pub mod schema;

pub use chain::{Branch, Chain, ChainBuilder, ChainRun, StepId};
pub use schema::{TypedSchema, TypedValue, CONVERTER_INSTRUCTIONS};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::ConversationEngine;
use crate::error::KestrelError;
use crate::history::render_turns;
use crate::provider::CompletionService;
use crate::types::{Turn, Usage};

pub(crate) const SUMMARY_PROMPT: &str = "This is the final step of the pipeline. Provide a summary of the main things that were done and why.
Do not omit any steps, and only print key details. This dialog was a pipeline, so do not assume the user knows about
any of the messages, even those that appeared to come from the user. Now is the time to build a proper summary for the user.";

fn step_prompt(prompt: &str) -> String {
    format!(
        "This is one step in a pipeline. Pipeline steps are user commands that do not come directly from the user.
user prompt: {prompt}"
    )
}

fn typed_prompt(prompt: &str, schema: &serde_json::Value) -> String {
    format!(
        "This is one step in a pipeline. Pipeline steps are user commands that do not come directly from the user.
The user expects the answer to the following prompt to follow this JSON schema:
{schema}
Respond ONLY with JSON that complies with the schema.
Prompt: {prompt}

IMPORTANT: remember you can ONLY return an answer that complies with the schema, no code and no other text."
    )
}

fn conversion_prompt(answer: &str, schema: &serde_json::Value) -> String {
    format!("response from other agent: {answer}, expected schema: {schema}")
}

/// Match a yes/no answer: "true" wins over "false"; neither is an error.
pub(crate) fn parse_yes_no(answer: &str) -> Result<bool, KestrelError> {
    let lowered = answer.to_lowercase();
    if lowered.contains("true") {
        Ok(true)
    } else if lowered.contains("false") {
        Ok(false)
    } else {
        Err(KestrelError::Workflow(format!(
            "expected True/False, got {answer:?}"
        )))
    }
}

/// Build the converter sub-agent used to coerce typed answers.
pub fn converter_engine(
    service: Arc<dyn CompletionService>,
) -> Result<ConversationEngine, KestrelError> {
    ConversationEngine::builder(service)
        .with_name("converter")
        .with_system_instruction(CONVERTER_INSTRUCTIONS)
        .build()
}

/// Engine override and incoming history for one pipeline call.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub engine: Option<Arc<ConversationEngine>>,
    pub history: Vec<Turn>,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, engine: Arc<ConversationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }
}

/// A step's value plus the turns it appended.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput<T> {
    pub value: T,
    pub history: Vec<Turn>,
}

/// Eager pipeline: every call runs immediately and returns its history delta.
#[derive(Default)]
pub struct Pipeline {
    default_engine: Option<Arc<ConversationEngine>>,
    converter: Option<Arc<ConversationEngine>>,
    full_history: Vec<Turn>,
    tokens: HashMap<String, Usage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_engine(mut self, engine: Arc<ConversationEngine>) -> Self {
        self.default_engine = Some(engine);
        self
    }

    /// Route typed answers through `converter` before parsing.
    pub fn with_converter(mut self, converter: Arc<ConversationEngine>) -> Self {
        self.converter = Some(converter);
        self
    }

    fn resolve_engine(&self, ctx: &StepContext) -> Result<Arc<ConversationEngine>, KestrelError> {
        ctx.engine
            .as_ref()
            .or(self.default_engine.as_ref())
            .cloned()
            .ok_or_else(|| {
                KestrelError::Configuration(
                    "either a default engine or a per-step engine must be set".into(),
                )
            })
    }

    fn record(&mut self, engine: &ConversationEngine, usage: &Usage, delta: &[Turn]) {
        self.tokens
            .entry(engine.model_id().to_string())
            .or_default()
            .merge(usage);
        self.full_history.extend_from_slice(delta);
    }

    /// Run one prompt as a pipeline step.
    pub async fn step(
        &mut self,
        prompt: &str,
        ctx: &StepContext,
    ) -> Result<StepOutput<String>, KestrelError> {
        let engine = self.resolve_engine(ctx)?;
        info!(step = prompt, "Pipeline step");
        let result = engine
            .send(&step_prompt(prompt), Some(ctx.history.as_slice()))
            .await?;
        self.record(&engine, &result.usage, &result.history);
        debug!(step = prompt, response = %result.text, "Pipeline step finished");
        Ok(StepOutput {
            value: result.text,
            history: result.history,
        })
    }

    /// Run prompts in order, each seeing the history of the ones before it.
    ///
    /// Returns the last answer (none for an empty list) and every delta.
    pub async fn steps<I, S>(
        &mut self,
        prompts: I,
        ctx: &StepContext,
    ) -> Result<StepOutput<Option<String>>, KestrelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut thread = ctx.clone();
        let mut last = None;
        let mut deltas = Vec::new();
        for prompt in prompts {
            let output = self.step(prompt.as_ref(), &thread).await?;
            thread.history.extend_from_slice(&output.history);
            deltas.extend(output.history);
            last = Some(output.value);
        }
        Ok(StepOutput {
            value: last,
            history: deltas,
        })
    }

    /// Evaluate `prompt` as a boolean step and run the matching branch.
    pub async fn if_step<S: AsRef<str>>(
        &mut self,
        prompt: &str,
        then_steps: &[S],
        else_steps: &[S],
        ctx: &StepContext,
    ) -> Result<StepOutput<Option<String>>, KestrelError> {
        info!(step = prompt, "Pipeline if-step");
        let gate = self.boolean_step(prompt, ctx).await?;
        let branch = if gate.value { then_steps } else { else_steps };
        debug!(step = prompt, condition = gate.value, "Branch selected");

        let mut thread = ctx.clone();
        thread.history.extend_from_slice(&gate.history);
        let output = self.steps(branch, &thread).await?;

        let mut history = gate.history;
        history.extend(output.history);
        Ok(StepOutput {
            value: output.value,
            history,
        })
    }

    /// Ask for an answer constrained to `T`'s schema and parse it strictly.
    pub async fn typed_step<T: TypedValue>(
        &mut self,
        prompt: &str,
        ctx: &StepContext,
    ) -> Result<StepOutput<T>, KestrelError> {
        let engine = self.resolve_engine(ctx)?;
        let schema = T::SCHEMA.schema();
        info!(step = prompt, schema = %T::SCHEMA, "Pipeline typed step");

        let result = engine
            .send(&typed_prompt(prompt, &schema), Some(ctx.history.as_slice()))
            .await?;
        self.record(&engine, &result.usage, &result.history);

        let reply = match self.converter.clone() {
            Some(converter) => {
                let fresh: &[Turn] = &[];
                let converted = converter
                    .send(&conversion_prompt(&result.text, &schema), Some(fresh))
                    .await?;
                self.record(&converter, &converted.usage, &converted.history);
                converted.text
            }
            None => result.text,
        };
        debug!(step = prompt, reply = %reply, "Typed reply");

        Ok(StepOutput {
            value: T::from_reply(&reply)?,
            history: result.history,
        })
    }

    pub async fn boolean_step(
        &mut self,
        prompt: &str,
        ctx: &StepContext,
    ) -> Result<StepOutput<bool>, KestrelError> {
        self.typed_step(prompt, ctx).await
    }

    pub async fn int_step(
        &mut self,
        prompt: &str,
        ctx: &StepContext,
    ) -> Result<StepOutput<i64>, KestrelError> {
        self.typed_step(prompt, ctx).await
    }

    pub async fn float_step(
        &mut self,
        prompt: &str,
        ctx: &StepContext,
    ) -> Result<StepOutput<f64>, KestrelError> {
        self.typed_step(prompt, ctx).await
    }

    pub async fn char_step(
        &mut self,
        prompt: &str,
        ctx: &StepContext,
    ) -> Result<StepOutput<char>, KestrelError> {
        self.typed_step(prompt, ctx).await
    }

    pub async fn string_array_step(
        &mut self,
        prompt: &str,
        ctx: &StepContext,
    ) -> Result<StepOutput<Vec<String>>, KestrelError> {
        self.typed_step(prompt, ctx).await
    }

    /// Ask for a synthesis of everything the pipeline has done.
    pub async fn summarize_full_history(
        &mut self,
        engine: Option<Arc<ConversationEngine>>,
    ) -> Result<StepOutput<String>, KestrelError> {
        let ctx = StepContext {
            engine,
            history: Vec::new(),
        };
        let engine = self.resolve_engine(&ctx)?;
        info!("Pipeline summary");
        let result = engine
            .send(SUMMARY_PROMPT, Some(self.full_history.as_slice()))
            .await?;
        self.record(&engine, &result.usage, &result.history);
        Ok(StepOutput {
            value: format!("SUMMARY:\n{}", result.text),
            history: result.history,
        })
    }

    /// Every turn produced by this pipeline, converter turns included.
    pub fn full_history(&self) -> &[Turn] {
        &self.full_history
    }

    pub fn render_full_history(&self) -> String {
        render_turns(&self.full_history)
    }

    /// Total tokens spent per model id.
    pub fn tokens_per_model(&self) -> HashMap<String, u32> {
        self.tokens
            .iter()
            .map(|(model, usage)| (model.clone(), usage.total_tokens))
            .collect()
    }
}
