//! Conversation engine: one chat session with tool dispatch, call limiting
//! and retry.

pub mod delegate;
pub mod sessions;

pub use delegate::DelegateCapability;
pub use sessions::{EnginePool, SessionCache};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::KestrelError;
use crate::history::History;
use crate::provider::{CompletionRequest, CompletionService};
use crate::tools::{Capability, ToolRegistry};
use crate::types::{FinishReason, GenerationSettings, SerializableTurn, Turn, Usage};
use crate::util::retry::{RetryEvent, RetryPolicy};
use crate::util::timeout::with_timeout;
use crate::util::usage::UsageTracker;

/// Callback receiving the final text of every completed exchange.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback notified of every retried send attempt.
pub type RetryObserver = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

const TOOL_RULES: &str = "# IMPORTANT
You are an agent with the ability to call a set of actions (functions). Follow these rules strictly:

* You must only call one method at a time.
* You cannot evaluate expressions as input arguments.
* You are not allowed to execute arbitrary code.

Ensure that you strictly follow these instructions.";

/// Outcome of a successful [`ConversationEngine::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    /// Final answer text.
    pub text: String,
    /// Turns appended to the session by this call.
    pub history: Vec<Turn>,
    /// Token usage summed over every completion of the successful attempt.
    pub usage: Usage,
}

/// Owns one chat session against a completion service.
///
/// `send` runs the full exchange: it submits the prompt, dispatches requested
/// tool calls one round at a time and returns once the model produces text.
/// Concurrent sends on the same engine are serialized.
pub struct ConversationEngine {
    name: String,
    service: Arc<dyn CompletionService>,
    registry: ToolRegistry,
    system_instruction: Option<String>,
    settings: GenerationSettings,
    call_limit: Option<usize>,
    retry: RetryPolicy,
    retry_observer: Option<RetryObserver>,
    on_message: Option<MessageCallback>,
    delegation_description: Option<String>,
    history_depth: Option<usize>,
    request_timeout: Option<Duration>,
    history: Mutex<History>,
    usage: UsageTracker,
}

struct Attempt {
    text: String,
    turns: Vec<Turn>,
    usage: Usage,
}

impl ConversationEngine {
    pub fn builder(service: Arc<dyn CompletionService>) -> EngineBuilder {
        EngineBuilder::new(service)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_id(&self) -> &str {
        self.service.model_id()
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    /// Description advertised when this engine serves as a delegate.
    pub fn delegation_description(&self) -> Option<&str> {
        self.delegation_description.as_deref()
    }

    pub fn has_message_callback(&self) -> bool {
        self.on_message.is_some()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Cumulative usage of this engine across all sends.
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Send a prompt and run the exchange to its final text.
    ///
    /// When `prior` is given it replaces the session history first (tool
    /// turns for unregistered tools are dropped) and only turns appended
    /// after it are returned.
    pub async fn send(
        &self,
        prompt: &str,
        prior: Option<&[Turn]>,
    ) -> Result<SendResult, KestrelError> {
        let mut session = self.history.lock().await;
        if let Some(prior) = prior {
            *session = self.filter_history(prior.to_vec());
        }
        let start = session.len();
        debug!(engine = %self.name, history = start, "Sending prompt");

        let base = session.turns();
        let outcome = self
            .retry
            .execute_with(
                || self.attempt(base.to_vec(), prompt),
                |e| !e.is_call_limit(),
                |event| {
                    debug!(
                        engine = %self.name,
                        attempt = event.attempt,
                        "Discarding turns of failed attempt"
                    );
                    if let Some(observer) = &self.retry_observer {
                        observer(event);
                    }
                },
            )
            .await?;

        *session = History::from_turns(outcome.turns);
        let delta = session.since(start).to_vec();
        if let Some(depth) = self.history_depth {
            session.trim_to_user_turns(depth);
        }
        drop(session);

        if let Some(callback) = &self.on_message {
            callback(&outcome.text);
        }

        Ok(SendResult {
            text: outcome.text,
            history: delta,
            usage: outcome.usage,
        })
    }

    /// One attempt over a private copy of the history, so a failure leaves
    /// the session untouched.
    async fn attempt(&self, history: Vec<Turn>, prompt: &str) -> Result<Attempt, KestrelError> {
        let mut request = CompletionRequest {
            system_instruction: self.system_instruction.clone(),
            history,
            tools: self.registry.descriptors(),
            settings: self.settings.clone(),
        };
        request.history.push(Turn::user(prompt));

        let mut rounds = 0usize;
        let mut usage = Usage::default();
        loop {
            let response =
                with_timeout(self.request_timeout, self.service.complete(&request)).await?;
            usage.merge(&response.usage);
            self.usage.record(self.service.model_id(), &response.usage);

            let Some(call) = response.tool_calls.first() else {
                let text = response
                    .text
                    .unwrap_or_else(|| missing_text_placeholder(response.finish_reason));
                request.history.push(Turn::model(text.clone()));
                return Ok(Attempt {
                    text,
                    turns: request.history,
                    usage,
                });
            };

            if response.tool_calls.len() > 1 {
                warn!(
                    engine = %self.name,
                    ignored = response.tool_calls.len() - 1,
                    "Model requested several tool calls in one round; dispatching the first"
                );
            }

            rounds += 1;
            if let Some(limit) = self.call_limit {
                if rounds > limit {
                    warn!(engine = %self.name, limit, "Tool call limit exceeded");
                    return Err(KestrelError::TooManyToolCalls {
                        limit,
                        history: request.history,
                    });
                }
            }

            info!(engine = %self.name, tool = %call.name, round = rounds, "Dispatching tool call");
            request
                .history
                .push(Turn::tool_call(&call.name, call.arguments.clone()));
            let result = self.registry.invoke(&call.name, &call.arguments).await;
            request.history.push(Turn::tool_result(&call.name, result));
        }
    }

    fn filter_history(&self, turns: Vec<Turn>) -> History {
        let mut history = History::from_turns(turns);
        history.retain_known_tools(|name| self.registry.contains(name));
        history
    }

    /// Snapshot of the session history.
    pub async fn history(&self) -> Vec<Turn> {
        self.history.lock().await.turns().to_vec()
    }

    /// Replace the session history, dropping tool turns for tools this
    /// engine does not register.
    pub async fn set_history(&self, turns: Vec<Turn>) {
        let filtered = self.filter_history(turns);
        *self.history.lock().await = filtered;
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Serializable `{role, text}` projection of the session.
    pub async fn export_history(&self) -> Vec<SerializableTurn> {
        self.history.lock().await.export()
    }

    /// Seed the session from a serializable projection.
    pub async fn import_history(&self, records: Vec<SerializableTurn>) {
        self.set_history(History::import(records).into_turns()).await;
    }
}

fn missing_text_placeholder(finish_reason: Option<FinishReason>) -> String {
    match finish_reason {
        Some(reason) => format!("Error: response contained no text (finish reason: {reason})"),
        None => "Error: response contained no text".to_string(),
    }
}

fn delegation_prompt(description: &str) -> String {
    format!(
        "Use this function to delegate a task to another agent (your coworker).
To delegate, pass a natural language command to the agent through this function.
Here is what this agent can be delegated to do: {description}

Keep in mind that the agent does not have the full context of the conversation,
so construct the command in a way the agent can understand and execute.
The agent will treat your message as if it came from the user and will respond to it accordingly."
    )
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("name", &self.name)
            .field("model", &self.service.model_id())
            .field("tools", &self.registry.names())
            .field("call_limit", &self.call_limit)
            .finish()
    }
}

/// Builder for [`ConversationEngine`].
pub struct EngineBuilder {
    service: Arc<dyn CompletionService>,
    name: Option<String>,
    tools: Vec<Arc<dyn Capability>>,
    delegates: Vec<Arc<ConversationEngine>>,
    system_instruction: Option<String>,
    settings: GenerationSettings,
    call_limit: Option<usize>,
    retry: RetryPolicy,
    retry_observer: Option<RetryObserver>,
    on_message: Option<MessageCallback>,
    delegation_description: Option<String>,
    history_depth: Option<usize>,
    request_timeout: Option<Duration>,
}

impl EngineBuilder {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self {
            service,
            name: None,
            tools: Vec::new(),
            delegates: Vec::new(),
            system_instruction: None,
            settings: GenerationSettings::default(),
            call_limit: None,
            retry: RetryPolicy::default(),
            retry_observer: None,
            on_message: None,
            delegation_description: None,
            history_depth: None,
            request_timeout: None,
        }
    }

    /// Name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Capability + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.tools.push(capability);
        self
    }

    pub fn with_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = Arc<dyn Capability>>,
    ) -> Self {
        self.tools.extend(capabilities);
        self
    }

    /// Expose a peer engine as tool `delegate_{i}_send_message`.
    pub fn with_delegate(mut self, peer: Arc<ConversationEngine>) -> Self {
        self.delegates.push(peer);
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Maximum tool rounds per send.
    pub fn with_call_limit(mut self, limit: usize) -> Self {
        self.call_limit = Some(limit);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_retry_observer(
        mut self,
        observer: impl Fn(&RetryEvent<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.retry_observer = Some(Arc::new(observer));
        self
    }

    pub fn with_on_message(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// What this engine can do, shown to engines that delegate to it.
    pub fn with_delegation_description(mut self, description: impl Into<String>) -> Self {
        self.delegation_description = Some(description.into());
        self
    }

    /// Keep at most this many user turns in the session after each send.
    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = Some(depth);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ConversationEngine, KestrelError> {
        let mut registry = ToolRegistry::new();
        for tool in self.tools {
            registry.register(tool)?;
        }
        for (i, peer) in self.delegates.into_iter().enumerate() {
            let capability = DelegateCapability::new(i, peer)?;
            registry.register(Arc::new(capability))?;
        }

        let system_instruction = if registry.is_empty() {
            self.system_instruction
        } else {
            let base = self.system_instruction.unwrap_or_default();
            Some(format!("{base}\n\n{TOOL_RULES}"))
        };

        Ok(ConversationEngine {
            name: self.name.unwrap_or_else(|| "engine".to_string()),
            service: self.service,
            registry,
            system_instruction,
            settings: self.settings,
            call_limit: self.call_limit,
            retry: self.retry,
            retry_observer: self.retry_observer,
            on_message: self.on_message,
            delegation_description: self.delegation_description.as_deref().map(delegation_prompt),
            history_depth: self.history_depth.filter(|&d| d > 0),
            request_timeout: self.request_timeout,
            history: Mutex::new(History::new()),
            usage: UsageTracker::new(),
        })
    }
}
