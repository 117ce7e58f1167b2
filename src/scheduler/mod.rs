//! Recurring prompts on a cron cadence.
//!
//! Each task gets a trigger that pushes its id onto one channel when its
//! cron schedule fires. A single worker drains the channel, so scheduled
//! tasks never overlap. An id that is already queued or running is not
//! queued again. The task set is persisted to a [`BlobStore`] after
//! every change and reloaded on [`Scheduler::start`].

pub mod store;

pub use store::{BlobStore, FileBlobStore, MemoryBlobStore};

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumString};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::ConversationEngine;
use crate::error::KestrelError;
use crate::tools::{Capability, FunctionTool, ToolArguments, ToolDescriptor, ToolParameters};

/// Default blob key for the persisted task set.
pub const DEFAULT_TASKS_KEY: &str = "scheduled_tasks.json";

const PRECONDITION_SUFFIX: &str = "Please execute all required tools to verify if this precondition is still met or not and return True/False.";

/// How often a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Recurrence {
    /// Every day at 01:00 UTC.
    Daily,
    /// At the start of every minute.
    Minute,
}

impl Recurrence {
    /// Six-field cron expression (seconds first).
    pub fn cron_expression(self) -> &'static str {
        match self {
            Self::Daily => "0 0 1 * * *",
            Self::Minute => "0 * * * * *",
        }
    }

    pub fn schedule(self) -> Result<cron::Schedule, KestrelError> {
        cron::Schedule::from_str(self.cron_expression())
            .map_err(|e| KestrelError::Configuration(format!("invalid cron expression: {e}")))
    }
}

/// A stored (prompt, precondition, negative prompt) task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub prompt: String,
    pub precondition: Option<String>,
    pub negative_prompt: Option<String>,
    pub recurrence: Recurrence,
}

struct Inner {
    store: Arc<dyn BlobStore>,
    key: String,
    tasks: Mutex<Vec<ScheduledTask>>,
    engine: RwLock<Option<Arc<ConversationEngine>>>,
    triggers: Mutex<Vec<(String, CancellationToken)>>,
    queue: mpsc::UnboundedSender<String>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    pending: Arc<DashSet<String>>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

/// Cron-driven executor of stored tasks. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Scheduler persisting its task set under [`DEFAULT_TASKS_KEY`].
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_key(store, DEFAULT_TASKS_KEY)
    }

    pub fn with_key(store: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                store,
                key: key.into(),
                tasks: Mutex::new(Vec::new()),
                engine: RwLock::new(None),
                triggers: Mutex::new(Vec::new()),
                queue,
                receiver: Mutex::new(Some(receiver)),
                pending: Arc::new(DashSet::new()),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Engine that executes the tasks.
    pub async fn attach_engine(&self, engine: Arc<ConversationEngine>) {
        if !engine.has_message_callback() {
            warn!(
                engine = %engine.name(),
                "Engine has no on_message callback; results of scheduled tasks will not be seen"
            );
        }
        *self.inner.engine.write().await = Some(engine);
    }

    fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.shutdown.is_cancelled()
    }

    /// Register a task, persist the task set and return the job id.
    pub async fn add_task(
        &self,
        prompt: impl Into<String>,
        precondition: Option<String>,
        negative_prompt: Option<String>,
        recurrence: Recurrence,
    ) -> Result<String, KestrelError> {
        let schedule = recurrence.schedule()?;
        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            precondition: precondition.filter(|p| !p.trim().is_empty()),
            negative_prompt: negative_prompt.filter(|p| !p.trim().is_empty()),
            recurrence,
        };
        let id = task.id.clone();

        let mut tasks = self.inner.tasks.lock().await;
        let mut updated = tasks.clone();
        updated.push(task);
        self.persist(&updated).await?;
        *tasks = updated;
        // Armed under the tasks lock so a concurrent start() cannot miss it.
        if self.is_running() {
            self.spawn_trigger(id.clone(), schedule).await;
        }
        drop(tasks);
        info!(job_id = %id, %recurrence, "Scheduled task added");
        Ok(id)
    }

    /// Cancel a task's trigger and remove it from the persisted set.
    pub async fn delete_task(&self, id: &str) -> Result<(), KestrelError> {
        {
            let mut tasks = self.inner.tasks.lock().await;
            let Some(position) = tasks.iter().position(|t| t.id == id) else {
                return Err(KestrelError::InvalidArgument(format!(
                    "no scheduled task with id {id}"
                )));
            };
            let mut updated = tasks.clone();
            updated.remove(position);
            self.persist(&updated).await?;
            *tasks = updated;
        }

        let mut triggers = self.inner.triggers.lock().await;
        triggers.retain(|(job_id, token)| {
            if job_id == id {
                token.cancel();
                false
            } else {
                true
            }
        });
        info!(job_id = id, "Scheduled task deleted");
        Ok(())
    }

    pub async fn list_tasks(&self) -> Vec<ScheduledTask> {
        self.inner.tasks.lock().await.clone()
    }

    /// Reload persisted tasks and start the triggers and the worker.
    pub async fn start(&self) -> Result<(), KestrelError> {
        let engine = self.inner.engine.read().await.clone().ok_or_else(|| {
            KestrelError::Configuration("an engine must be attached before starting".into())
        })?;
        let persisted = self.load().await?;
        let Some(mut receiver) = self.inner.receiver.lock().await.take() else {
            return Err(KestrelError::InvalidState("scheduler already started".into()));
        };

        let count = {
            let mut tasks = self.inner.tasks.lock().await;
            for stored in persisted {
                if !tasks.iter().any(|t| t.id == stored.id) {
                    tasks.push(stored);
                }
            }
            let schedules = tasks
                .iter()
                .map(|t| Ok((t.id.clone(), t.recurrence.schedule()?)))
                .collect::<Result<Vec<_>, KestrelError>>()?;
            self.inner.started.store(true, Ordering::SeqCst);
            for (id, schedule) in schedules {
                self.spawn_trigger(id, schedule).await;
            }
            tasks.len()
        };

        let scheduler = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = receiver.recv() => {
                        let Some(id) = next else { break };
                        scheduler.run_by_id(&id).await;
                        scheduler.inner.pending.remove(&id);
                    }
                }
            }
            debug!("Scheduler worker stopped");
        });

        info!(engine = %engine.name(), tasks = count, "Scheduler started");
        Ok(())
    }

    /// Stop every trigger and the worker.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.triggers.lock().await.clear();
        info!("Scheduler shut down");
    }

    async fn spawn_trigger(&self, id: String, schedule: cron::Schedule) {
        let token = self.inner.shutdown.child_token();
        self.inner
            .triggers
            .lock()
            .await
            .push((id.clone(), token.clone()));

        let queue = self.inner.queue.clone();
        let pending = self.inner.pending.clone();
        tokio::spawn(async move {
            // Fire times are offsets from this anchor on tokio's clock.
            let (anchor_at, anchor) = (tokio::time::Instant::now(), Utc::now());
            for next in schedule.upcoming(Utc) {
                let offset = (next - anchor).to_std().unwrap_or_default();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(anchor_at + offset) => {
                        if !pending.insert(id.clone()) {
                            debug!(job_id = %id, "Previous run still pending; skipping");
                            continue;
                        }
                        debug!(job_id = %id, "Trigger fired");
                        if queue.send(id.clone()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn run_by_id(&self, id: &str) {
        let task = self
            .inner
            .tasks
            .lock()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned();
        let Some(task) = task else {
            debug!(job_id = id, "Fired task no longer exists");
            return;
        };
        if let Err(e) = self.execute_task(&task).await {
            error!(job_id = id, error = %e, "Scheduled task failed");
        }
    }

    /// Run one task now: check the precondition, then send the prompt or the
    /// negative prompt.
    pub async fn execute_task(&self, task: &ScheduledTask) -> Result<(), KestrelError> {
        let engine = self.inner.engine.read().await.clone().ok_or_else(|| {
            KestrelError::Configuration("no engine attached to the scheduler".into())
        })?;
        debug!(job_id = %task.id, "Executing scheduled task");

        let prompt = match &task.precondition {
            None => Some(&task.prompt),
            Some(precondition) => {
                let check = format!("{precondition} {PRECONDITION_SUFFIX}");
                let answer = engine.send(&check, None).await?;
                let met = answer.text.to_lowercase().contains("true");
                debug!(job_id = %task.id, met, "Precondition evaluated");
                if met {
                    Some(&task.prompt)
                } else {
                    task.negative_prompt.as_ref()
                }
            }
        };

        if let Some(prompt) = prompt {
            engine.send(prompt, None).await?;
        }
        Ok(())
    }

    async fn persist(&self, tasks: &[ScheduledTask]) -> Result<(), KestrelError> {
        let bytes = serde_json::to_vec_pretty(tasks)?;
        self.inner.store.put(&self.inner.key, bytes).await
    }

    async fn load(&self) -> Result<Vec<ScheduledTask>, KestrelError> {
        match self.inner.store.get(&self.inner.key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Tools that let the model manage the task set.
    pub fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
        vec![
            Arc::new(self.add_task_tool()),
            Arc::new(self.list_tasks_tool()),
            Arc::new(self.delete_task_tool()),
        ]
    }

    fn add_task_tool(&self) -> FunctionTool {
        let descriptor = ToolDescriptor::new(
            "add_task",
            "Adds a recurring task. All prompts are natural language and are sent to the model as is; \
             do not name functions in them, write them as the message a user would type. \
             If a precondition is given it is verified first: the prompt runs when it holds, \
             otherwise the negative prompt runs.",
        )
        .with_parameters(
            ToolParameters::object()
                .string("prompt", "The prompt to execute", true)
                .string("recurrence", "How often to run: daily or minute", true)
                .string(
                    "precondition_prompt",
                    "Prompt verifying a precondition before the task runs",
                    false,
                )
                .string(
                    "negative_prompt",
                    "Prompt to execute when the precondition is not met",
                    false,
                )
                .build(),
        );
        let weak = Arc::downgrade(&self.inner);
        FunctionTool::new(descriptor, move |args: ToolArguments| {
            let weak = weak.clone();
            async move {
                let scheduler = upgrade(&weak)?;
                let recurrence = Recurrence::from_str(args.get_str("recurrence")?).map_err(|_| {
                    KestrelError::InvalidArgument("recurrence must be daily or minute".into())
                })?;
                let id = scheduler
                    .add_task(
                        args.get_str("prompt")?,
                        args.get_str_opt("precondition_prompt").map(str::to_string),
                        args.get_str_opt("negative_prompt").map(str::to_string),
                        recurrence,
                    )
                    .await?;
                Ok(json!(format!("job id is: {id}")))
            }
        })
    }

    fn list_tasks_tool(&self) -> FunctionTool {
        let weak = Arc::downgrade(&self.inner);
        FunctionTool::new(
            ToolDescriptor::new("list_tasks", "Returns all scheduled tasks."),
            move |_args: ToolArguments| {
                let weak = weak.clone();
                async move {
                    let tasks = upgrade(&weak)?.list_tasks().await;
                    Ok(serde_json::to_value(tasks)?)
                }
            },
        )
    }

    fn delete_task_tool(&self) -> FunctionTool {
        let descriptor = ToolDescriptor::new("delete_task", "Deletes a scheduled task by its job id.")
            .with_parameters(
                ToolParameters::object()
                    .string("job_id", "Id returned when the task was added", true)
                    .build(),
            );
        let weak = Arc::downgrade(&self.inner);
        FunctionTool::new(descriptor, move |args: ToolArguments| {
            let weak = weak.clone();
            async move {
                let id = args.get_str("job_id")?;
                upgrade(&weak)?.delete_task(id).await?;
                Ok(Value::String(format!("deleted {id}")))
            }
        })
    }
}

fn upgrade(weak: &Weak<Inner>) -> Result<Scheduler, KestrelError> {
    weak.upgrade()
        .map(|inner| Scheduler { inner })
        .ok_or_else(|| KestrelError::InvalidState("scheduler has been dropped".into()))
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("key", &self.inner.key)
            .finish()
    }
}
