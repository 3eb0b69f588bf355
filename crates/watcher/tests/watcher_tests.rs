//! Watcher scheduler tests
//!
//! The evaluation model is a mockall mock; node actions are a counting
//! `stop_node` capability so budgets can be checked without a daemon.

use async_trait::async_trait;
use mockall::mock;
use nodewarden_agent::{
    Capability, CapabilityError, CapabilityKind, CapabilityRegistry, ContextBuilder,
    StatusSection, ToolLoop, WorldModel,
};
use nodewarden_bridge::{LocalTransport, TopicBridge, TopicScope};
use nodewarden_config::WatcherConfig;
use nodewarden_provider::{ChatParams, ChatResponse, Provider, ProviderError, ToolCall};
use nodewarden_watcher::{
    register_watcher_capabilities, CycleOutcome, NewWatcher, WatcherError, WatcherScheduler,
    WatcherStore,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

struct StopNode {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Capability for StopNode {
    fn name(&self) -> &str {
        "stop_node"
    }
    fn description(&self) -> &str {
        "Stop a node"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]})
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, _args: Value) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("Node 'camera' stop: accepted".to_string())
    }
}

struct Harness {
    bridge: Arc<TopicBridge>,
    registry: Arc<CapabilityRegistry>,
    context: Arc<ContextBuilder>,
    stops: Arc<AtomicUsize>,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(LocalTransport::new());
        let bridge = Arc::new(TopicBridge::new(transport, TopicScope::new("local", "m1")));
        let registry = Arc::new(CapabilityRegistry::new());
        let stops = Arc::new(AtomicUsize::new(0));
        registry.register(StopNode {
            calls: stops.clone(),
        });
        let world = Arc::new(WorldModel::new(bridge.clone()));
        let context = Arc::new(ContextBuilder::new(dir.path(), world, registry.clone()));
        Self {
            bridge,
            registry,
            context,
            stops,
            dir,
        }
    }

    fn store(&self) -> WatcherStore {
        WatcherStore::new(self.dir.path().join("watchers.json"))
    }

    async fn scheduler(&self, mock: MockProvider, config: &WatcherConfig) -> Arc<WatcherScheduler> {
        let tool_loop = ToolLoop::new(Arc::new(mock), self.registry.clone(), "eval-model", 3);
        WatcherScheduler::open(
            self.bridge.clone(),
            tool_loop,
            self.context.clone(),
            self.store(),
            config,
        )
        .await
    }

    /// Publish and wait until the bridge has buffered the sample
    async fn feed(&self, topic: &str, payload: Value) {
        self.bridge
            .publish(topic, payload.to_string().into_bytes())
            .await
            .unwrap();
        for _ in 0..100 {
            if let Some(sample) = self.bridge.get_latest(topic) {
                if sample.payload == payload.to_string().into_bytes() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sample on {topic} never arrived");
    }
}

fn temp_watcher(max_actions: u32) -> NewWatcher {
    NewWatcher::new(
        "temp",
        vec!["sensors/temp".to_string()],
        "stop the camera when it runs above 80C",
    )
    .interval(10)
    .max_actions(max_actions)
}

fn stop_camera() -> ChatResponse {
    ChatResponse::with_calls(vec![ToolCall {
        id: "c1".to_string(),
        name: "stop_node".to_string(),
        arguments: json!({"name": "camera"}),
    }])
}

// ============================================================================
// Create / remove / pause
// ============================================================================

#[tokio::test]
async fn test_create_reports_settings_and_clamps_interval() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;

    let message = scheduler
        .create(temp_watcher(2).interval(1))
        .await
        .unwrap();
    assert_eq!(
        message,
        "Watcher 'temp' created.\n  Topics: sensors/temp\n  Check interval: 10s\n  Instruction: stop the camera when it runs above 80C\n  Max actions/hour: 2"
    );
    assert_eq!(scheduler.get("temp").unwrap().spec.sample_interval_sec, 10);
    assert_eq!(harness.bridge.subscription_count().await, 1);
}

#[tokio::test]
async fn test_create_rejects_duplicates_and_empty_topics() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;

    scheduler.create(temp_watcher(2)).await.unwrap();
    let err = scheduler.create(temp_watcher(5)).await.unwrap_err();
    assert!(matches!(err, WatcherError::Duplicate(_)));
    assert_eq!(err.to_string(), "Watcher 'temp' already exists. Remove it first.");

    let err = scheduler
        .create(NewWatcher::new("empty", vec![], "nothing"))
        .await
        .unwrap_err();
    assert!(matches!(err, WatcherError::NoTopics(_)));
    assert_eq!(scheduler.list().len(), 1);
}

#[tokio::test]
async fn test_remove_and_pause() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(2)).await.unwrap();

    assert_eq!(scheduler.set_paused("temp", true).await.unwrap(), "Watcher 'temp' paused.");
    assert!(matches!(scheduler.evaluate_now("temp").await, CycleOutcome::Paused));
    assert!(scheduler.describe_all().starts_with("### temp [PAUSED]"));
    assert_eq!(scheduler.set_paused("temp", false).await.unwrap(), "Watcher 'temp' resumed.");

    assert_eq!(scheduler.remove("temp").await.unwrap(), "Watcher 'temp' removed.");
    assert!(matches!(
        scheduler.remove("temp").await,
        Err(WatcherError::NotFound(_))
    ));
    assert!(matches!(scheduler.evaluate_now("temp").await, CycleOutcome::NotFound));
    assert_eq!(scheduler.describe_all(), "No active watchers.");
}

#[tokio::test]
async fn test_watchers_survive_reopen() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(4)).await.unwrap();
    scheduler
        .create(NewWatcher::new("weather", vec!["weather/current".to_string()], "log storms"))
        .await
        .unwrap();
    scheduler.set_paused("weather", true).await.unwrap();
    let before: Vec<_> = scheduler.list().into_iter().map(|w| w.spec).collect();
    drop(scheduler);

    let reopened = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;
    let after: Vec<_> = reopened.list().into_iter().map(|w| w.spec).collect();
    assert_eq!(after.len(), 2);
    for (b, a) in before.iter().zip(&after) {
        assert_eq!((&b.name, &b.topics, &b.instruction), (&a.name, &a.topics, &a.instruction));
        assert_eq!(b.max_actions_per_hour, a.max_actions_per_hour);
        assert!((b.created_at - a.created_at).abs() < 1e-3);
    }
    assert_eq!(after[1].sample_interval_sec, 30);
    assert!(after[1].paused);
    assert!(reopened.get("temp").unwrap().history.is_empty());
}

#[tokio::test]
async fn test_stored_intervals_are_clamped_on_load() {
    let harness = Harness::new();
    std::fs::write(
        harness.dir.path().join("watchers.json"),
        json!([
            {"name": "fast", "topics": ["a"], "instruction": "x", "sample_interval_sec": 0},
            {"name": "slow", "topics": ["b"], "instruction": "y", "sample_interval_sec": 86400}
        ])
        .to_string(),
    )
    .unwrap();

    let scheduler = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;
    assert_eq!(scheduler.get("fast").unwrap().spec.sample_interval_sec, 10);
    assert_eq!(scheduler.get("slow").unwrap().spec.sample_interval_sec, 3600);
}

#[tokio::test]
async fn test_corrupt_store_opens_empty() {
    let harness = Harness::new();
    std::fs::write(harness.dir.path().join("watchers.json"), "{not json").unwrap();

    let scheduler = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;
    assert!(scheduler.list().is_empty());
    assert!(scheduler.render().is_none());
}

// ============================================================================
// Evaluation cycles
// ============================================================================

#[tokio::test]
async fn test_no_data_means_no_model_call() {
    let harness = Harness::new();
    let mut mock = MockProvider::new();
    mock.expect_chat().times(0);
    let scheduler = harness.scheduler(mock, &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(2)).await.unwrap();

    assert!(matches!(scheduler.evaluate_now("temp").await, CycleOutcome::NoData));
    assert!(scheduler.get("temp").unwrap().history.is_empty());
}

#[tokio::test]
async fn test_action_budget_withholds_catalog_on_third_cycle() {
    let harness = Harness::new();
    let offered: Arc<Mutex<Vec<(usize, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = offered.clone();

    let mut mock = MockProvider::new();
    mock.expect_chat().returning(move |params| {
        let last = params.messages.last().unwrap();
        if last.role == "tool" {
            return Ok(ChatResponse::text("Camera stopped, temperature too high."));
        }
        let observe_only = last.text().contains("Observe only");
        seen.lock().unwrap().push((params.tools.len(), observe_only));
        if params.tools.is_empty() {
            Ok(ChatResponse::text("Still hot, observing only."))
        } else {
            Ok(stop_camera())
        }
    });

    let scheduler = harness.scheduler(mock, &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(2)).await.unwrap();
    harness.feed("sensors/temp", json!({"celsius": 91})).await;

    for _ in 0..2 {
        match scheduler.evaluate_now("temp").await {
            CycleOutcome::Evaluated(eval) => {
                assert_eq!(eval.actions, vec![r#"stop_node({"name":"camera"})"#.to_string()]);
                assert_eq!(eval.data, json!({"sensors/temp": {"celsius": 91}}));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    match scheduler.evaluate_now("temp").await {
        CycleOutcome::Evaluated(eval) => {
            assert!(eval.actions.is_empty());
            assert_eq!(eval.assessment, "Still hot, observing only.");
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    assert_eq!(harness.stops.load(Ordering::SeqCst), 2);
    let offered = offered.lock().unwrap().clone();
    assert_eq!(offered.len(), 3);
    assert!(offered[0].0 > 0 && !offered[0].1);
    assert_eq!(offered[2], (0, true));

    let watcher = scheduler.get("temp").unwrap();
    assert_eq!(watcher.history.len(), 3);
    assert_eq!(watcher.actions_this_hour(), 2);
    assert!(watcher.describe().ends_with("Actions this hour: 2/2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_cycles_share_one_budget() {
    let harness = Harness::new();
    // identity file read makes the context build yield mid-cycle
    std::fs::write(harness.dir.path().join("SOUL.md"), "# Fleet operator\n").unwrap();

    let mut mock = MockProvider::new();
    mock.expect_chat().returning(|params| {
        let last = params.messages.last().unwrap();
        if last.role == "tool" {
            Ok(ChatResponse::text("Camera stopped."))
        } else if params.tools.is_empty() {
            Ok(ChatResponse::text("Already acted this hour."))
        } else {
            Ok(stop_camera())
        }
    });

    let scheduler = harness.scheduler(mock, &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(1)).await.unwrap();
    harness.feed("sensors/temp", json!({"celsius": 95})).await;

    let first = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.evaluate_now("temp").await }
    });
    let second = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.evaluate_now("temp").await }
    });
    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    assert!(outcomes.iter().all(|o| matches!(o, CycleOutcome::Evaluated(_))));

    assert_eq!(harness.stops.load(Ordering::SeqCst), 1);
    let watcher = scheduler.get("temp").unwrap();
    assert_eq!(watcher.history.len(), 2);
    assert_eq!(watcher.actions_this_hour(), 1);
}

#[tokio::test]
async fn test_evaluation_catalog_is_the_watcher_subset() {
    let harness = Harness::new();
    let names: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = names.clone();

    let mut mock = MockProvider::new();
    mock.expect_chat().times(1).returning(move |params| {
        *seen.lock().unwrap() = params.tools.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(params.max_tokens, 1024);
        assert!(params.messages[0].text().contains("## System State (Summary)"));
        Ok(ChatResponse::text("Temperature normal."))
    });

    let scheduler = harness.scheduler(mock, &WatcherConfig::default()).await;
    register_watcher_capabilities(&harness.registry, &scheduler);
    scheduler.create(temp_watcher(2)).await.unwrap();
    harness.feed("sensors/temp", json!({"celsius": 40})).await;

    assert!(matches!(scheduler.evaluate_now("temp").await, CycleOutcome::Evaluated(_)));
    // watcher management capabilities are never offered to evaluations
    assert_eq!(*names.lock().unwrap(), vec!["stop_node".to_string()]);
}

#[tokio::test]
async fn test_global_limiter_caps_evaluations_per_minute() {
    let harness = Harness::new();
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Ok(ChatResponse::text("fine")));

    let config = WatcherConfig {
        max_evaluations_per_minute: 1,
        ..WatcherConfig::default()
    };
    let scheduler = harness.scheduler(mock, &config).await;
    scheduler.create(temp_watcher(2)).await.unwrap();
    scheduler
        .create(NewWatcher::new("temp2", vec!["sensors/temp".to_string()], "log it"))
        .await
        .unwrap();
    harness.feed("sensors/temp", json!({"celsius": 50})).await;

    assert!(matches!(scheduler.evaluate_now("temp").await, CycleOutcome::Evaluated(_)));
    assert!(matches!(scheduler.evaluate_now("temp2").await, CycleOutcome::RateLimited));
}

#[tokio::test]
async fn test_provider_failure_records_nothing() {
    let harness = Harness::new();
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Err(ProviderError::Api("overloaded".to_string())));

    let scheduler = harness.scheduler(mock, &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(2)).await.unwrap();
    harness.feed("sensors/temp", json!({"celsius": 50})).await;

    assert!(matches!(scheduler.evaluate_now("temp").await, CycleOutcome::Failed(_)));
    assert!(scheduler.get("temp").unwrap().history.is_empty());
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_tasks_evaluate_on_interval_until_stopped() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut mock = MockProvider::new();
    mock.expect_chat().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse::text("ok"))
    });

    let scheduler = harness.scheduler(mock, &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(2)).await.unwrap();
    harness.feed("sensors/temp", json!({"celsius": 50})).await;

    scheduler.start().await;
    assert!(scheduler.is_running());
    assert_eq!(scheduler.task_count(), 1);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    scheduler.stop();
    assert!(!scheduler.is_running());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_cycles_without_data_never_call_the_model() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut mock = MockProvider::new();
    mock.expect_chat().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse::text("unexpected"))
    });

    let scheduler = harness.scheduler(mock, &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(2)).await.unwrap();
    scheduler.start().await;

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(scheduler.get("temp").unwrap().history.is_empty());
    assert_eq!(scheduler.task_count(), 1);
    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn test_paused_watcher_keeps_its_schedule() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut mock = MockProvider::new();
    mock.expect_chat().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse::text("ok"))
    });

    let scheduler = harness.scheduler(mock, &WatcherConfig::default()).await;
    scheduler.create(temp_watcher(2)).await.unwrap();
    harness.feed("sensors/temp", json!({"celsius": 50})).await;
    scheduler.set_paused("temp", true).await.unwrap();
    scheduler.start().await;

    // ticks at 10s and 20s are skipped
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.task_count(), 1);

    // resumed before the 30s tick, which evaluates on the original clock
    scheduler.set_paused("temp", false).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.get("temp").unwrap().history.len(), 1);
    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn test_watcher_created_while_running_gets_a_task() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;
    scheduler.start().await;
    assert_eq!(scheduler.task_count(), 0);

    scheduler.create(temp_watcher(2)).await.unwrap();
    assert_eq!(scheduler.task_count(), 1);

    scheduler.remove("temp").await.unwrap();
    tokio::task::yield_now().await;
    assert_eq!(scheduler.task_count(), 0);
    scheduler.stop();
}

// ============================================================================
// Capabilities and status
// ============================================================================

#[tokio::test]
async fn test_watcher_capabilities() {
    let harness = Harness::new();
    let scheduler = harness.scheduler(MockProvider::new(), &WatcherConfig::default()).await;
    register_watcher_capabilities(&harness.registry, &scheduler);

    let args = json!({
        "name": "temp",
        "topics": ["sensors/temp"],
        "instruction": "watch it",
        "sample_interval_sec": 5000
    });
    let created = harness.registry.invoke("create_watcher", args.clone()).await;
    assert!(created.contains("Check interval: 3600s"));
    assert_eq!(
        harness.registry.invoke("create_watcher", args).await,
        "Watcher 'temp' already exists. Remove it first."
    );
    assert_eq!(harness.registry.kind_of("create_watcher"), Some(CapabilityKind::Action));
    assert_eq!(harness.registry.kind_of("list_watchers"), Some(CapabilityKind::Read));

    assert_eq!(
        harness
            .registry
            .invoke("pause_watcher", json!({"name": "temp"}))
            .await,
        "Watcher 'temp' paused."
    );
    assert!(harness
        .registry
        .invoke("list_watchers", json!({}))
        .await
        .contains("[PAUSED]"));
    assert_eq!(
        harness
            .registry
            .invoke("remove_watcher", json!({"name": "ghost"}))
            .await,
        "Watcher 'ghost' not found."
    );

    let section = scheduler.render().unwrap();
    assert!(section.starts_with("### temp [PAUSED]"));
    assert_eq!(scheduler.title(), "Active Watchers");
}
