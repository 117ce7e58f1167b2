//! Tests for the task scheduler.

mod common;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::ScriptedService;
use kestrel::engine::ConversationEngine;
use kestrel::error::KestrelError;
use kestrel::provider::{CompletionRequest, CompletionResponse, CompletionService};
use kestrel::scheduler::{
    BlobStore, FileBlobStore, MemoryBlobStore, Recurrence, ScheduledTask, Scheduler,
    DEFAULT_TASKS_KEY,
};
use kestrel::types::Turn;

fn sent_prompts(service: &ScriptedService) -> Vec<String> {
    service
        .requests()
        .iter()
        .filter_map(|r| r.history.last().and_then(Turn::text).map(str::to_string))
        .collect()
}

async fn scheduler_with_engine(service: &Arc<ScriptedService>) -> Scheduler {
    let scheduler = Scheduler::new(Arc::new(MemoryBlobStore::new()));
    let engine = ConversationEngine::builder(service.clone()).build().unwrap();
    scheduler.attach_engine(Arc::new(engine)).await;
    scheduler
}

fn task(precondition: Option<&str>, negative: Option<&str>) -> ScheduledTask {
    ScheduledTask {
        id: "job-1".into(),
        prompt: "Buy 10 shares".into(),
        precondition: precondition.map(str::to_string),
        negative_prompt: negative.map(str::to_string),
        recurrence: Recurrence::Daily,
    }
}

#[tokio::test]
async fn task_without_precondition_sends_prompt() {
    let service = ScriptedService::new("main");
    let scheduler = scheduler_with_engine(&service).await;

    scheduler.execute_task(&task(None, None)).await.unwrap();

    assert_eq!(sent_prompts(&service), vec!["Buy 10 shares".to_string()]);
}

#[tokio::test]
async fn met_precondition_sends_prompt() {
    let service = ScriptedService::new("main");
    service.queue_text("True, the price is below 100").queue_text("Bought");
    let scheduler = scheduler_with_engine(&service).await;

    scheduler
        .execute_task(&task(Some("Is the price below 100?"), Some("Sell everything")))
        .await
        .unwrap();

    let prompts = sent_prompts(&service);
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].starts_with("Is the price below 100? Please execute all required tools"));
    assert!(prompts[0].ends_with("return True/False."));
    assert_eq!(prompts[1], "Buy 10 shares");
}

#[tokio::test]
async fn unmet_precondition_sends_negative_prompt() {
    let service = ScriptedService::new("main");
    service.queue_text("False").queue_text("Sold");
    let scheduler = scheduler_with_engine(&service).await;

    scheduler
        .execute_task(&task(Some("Is the price below 100?"), Some("Sell everything")))
        .await
        .unwrap();

    assert_eq!(sent_prompts(&service)[1], "Sell everything");
}

#[tokio::test]
async fn unmet_precondition_without_negative_prompt_does_nothing_more() {
    let service = ScriptedService::new("main");
    service.queue_text("false");
    let scheduler = scheduler_with_engine(&service).await;

    scheduler
        .execute_task(&task(Some("Is the price below 100?"), None))
        .await
        .unwrap();

    assert_eq!(service.call_count(), 1);
}

#[tokio::test]
async fn executing_without_engine_is_a_configuration_error() {
    let scheduler = Scheduler::new(Arc::new(MemoryBlobStore::new()));
    let err = scheduler.execute_task(&task(None, None)).await.unwrap_err();
    assert!(matches!(err, KestrelError::Configuration(_)));
}

#[tokio::test]
async fn task_set_is_persisted_and_reloaded_on_start() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let first = Scheduler::new(store.clone());
    let kept = first
        .add_task("Summarize the news", None, None, Recurrence::Daily)
        .await
        .unwrap();
    let dropped = first
        .add_task(
            "Check the portfolio",
            Some("Is the market open?".into()),
            Some(String::new()),
            Recurrence::Minute,
        )
        .await
        .unwrap();
    first.delete_task(&dropped).await.unwrap();

    let second = Scheduler::new(store.clone());
    let engine = ConversationEngine::builder(ScriptedService::new("main"))
        .build()
        .unwrap();
    second.attach_engine(Arc::new(engine)).await;
    second.start().await.unwrap();

    let tasks = second.list_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, kept);
    assert_eq!(tasks[0].prompt, "Summarize the news");

    let err = second.start().await.unwrap_err();
    assert!(matches!(err, KestrelError::InvalidState(_)));
    second.shutdown().await;
}

#[tokio::test]
async fn empty_optional_prompts_are_stored_as_absent() {
    let scheduler = Scheduler::new(Arc::new(MemoryBlobStore::new()));
    scheduler
        .add_task("Ping", Some("  ".into()), Some(String::new()), Recurrence::Minute)
        .await
        .unwrap();

    let tasks = scheduler.list_tasks().await;
    assert_eq!(tasks[0].precondition, None);
    assert_eq!(tasks[0].negative_prompt, None);
}

#[tokio::test]
async fn file_store_holds_a_json_array_of_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileBlobStore::new(dir.path()));
    let scheduler = Scheduler::new(store.clone());

    let id = scheduler
        .add_task(
            "Water the plants",
            Some("Is the soil dry?".into()),
            None,
            Recurrence::Daily,
        )
        .await
        .unwrap();

    let raw = tokio::fs::read(dir.path().join(DEFAULT_TASKS_KEY)).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(
        value,
        json!([{
            "id": id,
            "prompt": "Water the plants",
            "precondition": "Is the soil dry?",
            "negative_prompt": null,
            "recurrence": "daily",
        }])
    );
}

#[tokio::test]
async fn model_manages_tasks_through_capabilities() {
    let service = ScriptedService::new("main");
    service
        .queue_tool_call(
            "add_task",
            json!({ "prompt": "Send me the weather", "recurrence": "Daily" }),
        )
        .queue_text("Scheduled it")
        .queue_tool_call("list_tasks", json!({}))
        .queue_text("You have one task");

    let scheduler = Scheduler::new(Arc::new(MemoryBlobStore::new()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let engine = Arc::new(
        ConversationEngine::builder(service.clone())
            .with_capabilities(scheduler.capabilities())
            .with_on_message(move |text| sink.lock().unwrap().push(text.to_string()))
            .build()
            .unwrap(),
    );
    scheduler.attach_engine(engine.clone()).await;

    let added = engine.send("Every day, send me the weather", None).await.unwrap();
    let confirmation = match &added.history[2] {
        Turn::ToolResult { result, .. } => result.as_str().unwrap().to_string(),
        other => panic!("unexpected turn: {other:?}"),
    };
    assert!(confirmation.starts_with("job id is: "));

    let tasks = scheduler.list_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].recurrence, Recurrence::Daily);
    assert_eq!(confirmation, format!("job id is: {}", tasks[0].id));

    let listed = engine.send("What is scheduled?", None).await.unwrap();
    match &listed.history[2] {
        Turn::ToolResult { result, .. } => {
            assert_eq!(result[0]["prompt"], "Send me the weather");
        }
        other => panic!("unexpected turn: {other:?}"),
    }

    let removed = engine
        .registry()
        .invoke("delete_task", &json!({ "job_id": tasks[0].id }))
        .await;
    assert_eq!(removed, json!(format!("deleted {}", tasks[0].id)));
    assert!(scheduler.list_tasks().await.is_empty());
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn add_task_tool_rejects_unknown_recurrence() {
    let scheduler = Scheduler::new(Arc::new(MemoryBlobStore::new()));
    let engine = ConversationEngine::builder(ScriptedService::new("main"))
        .with_capabilities(scheduler.capabilities())
        .build()
        .unwrap();

    let result = engine
        .registry()
        .invoke("add_task", &json!({ "prompt": "x", "recurrence": "hourly" }))
        .await;

    let message = result["error"].as_str().unwrap();
    assert!(message.starts_with("Invalid arguments for function add_task"));
    assert!(scheduler.list_tasks().await.is_empty());
}

/// Store whose writes can be switched to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryBlobStore,
    fail_writes: AtomicBool,
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KestrelError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), KestrelError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KestrelError::Storage("disk full".into()));
        }
        self.inner.put(key, bytes).await
    }
}

async fn stored_ids(store: &FlakyStore) -> Vec<String> {
    let bytes = store.get(DEFAULT_TASKS_KEY).await.unwrap().unwrap();
    let tasks: Vec<ScheduledTask> = serde_json::from_slice(&bytes).unwrap();
    tasks.into_iter().map(|t| t.id).collect()
}

#[tokio::test]
async fn failed_writes_leave_the_task_set_unchanged() {
    let store = Arc::new(FlakyStore::default());
    let scheduler = Scheduler::new(store.clone());
    let kept = scheduler
        .add_task("Summarize the news", None, None, Recurrence::Daily)
        .await
        .unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);

    let err = scheduler
        .add_task("Check the portfolio", None, None, Recurrence::Minute)
        .await
        .unwrap_err();
    assert!(matches!(err, KestrelError::Storage(_)));
    let err = scheduler.delete_task(&kept).await.unwrap_err();
    assert!(matches!(err, KestrelError::Storage(_)));

    let live: Vec<String> = scheduler.list_tasks().await.into_iter().map(|t| t.id).collect();
    assert_eq!(live, vec![kept.clone()]);
    assert_eq!(stored_ids(&store).await, vec![kept]);
}

/// Service that sleeps for a queued duration per call and tracks overlap.
#[derive(Default)]
struct PacedService {
    delays: Mutex<VecDeque<Duration>>,
    prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl PacedService {
    fn with_delays(delays: impl IntoIterator<Item = Duration>) -> Arc<Self> {
        Arc::new(Self {
            delays: Mutex::new(delays.into_iter().collect()),
            ..Default::default()
        })
    }

    fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for PacedService {
    fn model_id(&self) -> &str {
        "paced"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, KestrelError> {
        let prompt = request
            .history
            .last()
            .and_then(Turn::text)
            .unwrap_or_default()
            .to_string();
        self.prompts.lock().unwrap().push(prompt);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(CompletionResponse::text("done"))
    }
}

async fn running_scheduler(service: Arc<PacedService>) -> Scheduler {
    let scheduler = Scheduler::new(Arc::new(MemoryBlobStore::new()));
    let engine = ConversationEngine::builder(service).build().unwrap();
    scheduler.attach_engine(Arc::new(engine)).await;
    scheduler
}

/// Let paused time run until the service has seen `count` calls.
async fn wait_for_calls(service: &PacedService, count: usize) {
    for _ in 0..300 {
        if service.call_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("expected {count} calls, saw {}", service.call_count());
}

#[tokio::test(start_paused = true)]
async fn minute_task_fires_through_the_worker_until_deleted() {
    let service = PacedService::with_delays([]);
    let scheduler = running_scheduler(service.clone()).await;
    let id = scheduler
        .add_task("Check the inbox", None, None, Recurrence::Minute)
        .await
        .unwrap();
    scheduler.start().await.unwrap();

    wait_for_calls(&service, 1).await;
    assert_eq!(*service.prompts.lock().unwrap(), vec!["Check the inbox".to_string()]);

    wait_for_calls(&service, 2).await;
    scheduler.delete_task(&id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(service.call_count(), 2);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn task_added_after_start_gets_a_trigger() {
    let service = PacedService::with_delays([]);
    let scheduler = running_scheduler(service.clone()).await;
    scheduler.start().await.unwrap();

    scheduler
        .add_task("Water the plants", None, None, Recurrence::Minute)
        .await
        .unwrap();

    wait_for_calls(&service, 1).await;
    assert_eq!(service.prompts.lock().unwrap()[0], "Water the plants");
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_all_triggers() {
    let service = PacedService::with_delays([]);
    let scheduler = running_scheduler(service.clone()).await;
    scheduler
        .add_task("Check the inbox", None, None, Recurrence::Minute)
        .await
        .unwrap();
    scheduler.start().await.unwrap();
    wait_for_calls(&service, 1).await;

    scheduler.shutdown().await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(service.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn tasks_firing_together_run_one_at_a_time() {
    let service = PacedService::with_delays([Duration::from_secs(20), Duration::from_secs(20)]);
    let scheduler = running_scheduler(service.clone()).await;
    scheduler
        .add_task("First", None, None, Recurrence::Minute)
        .await
        .unwrap();
    scheduler
        .add_task("Second", None, None, Recurrence::Minute)
        .await
        .unwrap();
    scheduler.start().await.unwrap();

    wait_for_calls(&service, 2).await;

    assert_eq!(service.max_in_flight.load(Ordering::SeqCst), 1);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_run_does_not_queue_a_backlog() {
    // The first run outlasts nine ticks; later runs are instant.
    let service = PacedService::with_delays([Duration::from_secs(590)]);
    let scheduler = running_scheduler(service.clone()).await;
    scheduler
        .add_task("Rebalance", None, None, Recurrence::Minute)
        .await
        .unwrap();
    scheduler.start().await.unwrap();
    wait_for_calls(&service, 1).await;

    // The slow run has finished but the next tick has not come yet.
    tokio::time::sleep(Duration::from_secs(595)).await;
    assert_eq!(service.call_count(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(service.call_count(), 2);
    scheduler.shutdown().await;
}
