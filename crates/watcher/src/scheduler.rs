//! Watcher scheduler
//!
//! One cancellable tokio task per watcher. Each cycle sleeps for the
//! watcher's interval, then evaluates unless the watcher is paused, the
//! shared per-minute budget is spent, or none of its topics has data yet.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nodewarden_agent::{Catalog, ContextBuilder, LoopStatus, StatusSection, ToolLoop};
use nodewarden_bridge::TopicBridge;
use nodewarden_config::WatcherConfig;
use nodewarden_provider::Message;

use crate::limiter::EvaluationLimiter;
use crate::model::{clamp_interval, NewWatcher, Watcher, WatcherEvaluation, WatcherSpec};
use crate::store::WatcherStore;
use crate::{Result, WatcherError};

/// Capabilities offered to watcher evaluations
pub const WATCHER_CAPABILITIES: [&str; 7] = [
    "list_nodes",
    "start_node",
    "stop_node",
    "restart_node",
    "subscribe_topic",
    "remember",
    "publish_message",
];

const EVAL_MAX_TOKENS: u32 = 1024;
const EVAL_TEMPERATURE: f32 = 0.1;
const HISTORY_IN_PROMPT: usize = 5;
const RATE_NOTE: &str = "\nNOTE: Action rate limit reached for this hour. Observe only.";

/// What one evaluation cycle did
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    NotFound,
    Paused,
    RateLimited,
    NoData,
    Evaluated(WatcherEvaluation),
    /// Model backend failed; nothing recorded
    Failed(String),
}

struct WatcherTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl WatcherTask {
    fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

/// Owns watcher state, persistence and the per-watcher tasks
pub struct WatcherScheduler {
    bridge: Arc<TopicBridge>,
    tool_loop: ToolLoop,
    context: Arc<ContextBuilder>,
    store: WatcherStore,
    default_interval_secs: u64,
    default_max_actions: u32,
    watchers: Mutex<Vec<Watcher>>,
    limiter: Mutex<EvaluationLimiter>,
    tasks: Mutex<HashMap<String, WatcherTask>>,
    /// Serializes cycles of the same watcher so budget spend is never lost
    cycles: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    root: Mutex<Option<CancellationToken>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl WatcherScheduler {
    /// Build the scheduler and load every persisted watcher
    ///
    /// `tool_loop` should carry the evaluation model and the shared registry.
    /// An unreadable store is logged and treated as empty.
    pub async fn open(
        bridge: Arc<TopicBridge>,
        tool_loop: ToolLoop,
        context: Arc<ContextBuilder>,
        store: WatcherStore,
        config: &WatcherConfig,
    ) -> Arc<Self> {
        let specs = match store.load().await {
            Ok(specs) => specs,
            Err(e) => {
                error!("Failed to load watchers from {:?}: {}", store.path(), e);
                Vec::new()
            }
        };

        let mut watchers: Vec<Watcher> = Vec::with_capacity(specs.len());
        for mut spec in specs {
            let clamped = clamp_interval(spec.sample_interval_sec);
            if clamped != spec.sample_interval_sec {
                warn!(
                    "Watcher '{}' interval {}s out of range, using {}s",
                    spec.name, spec.sample_interval_sec, clamped
                );
                spec.sample_interval_sec = clamped;
            }
            if watchers.iter().any(|w| w.name() == spec.name) {
                warn!("Duplicate watcher '{}' in store, keeping the first", spec.name);
                continue;
            }
            debug!("Loaded watcher: {}", spec.name);
            watchers.push(Watcher::new(spec));
        }

        Arc::new(Self {
            bridge,
            tool_loop: tool_loop.with_sampling(EVAL_MAX_TOKENS, EVAL_TEMPERATURE),
            context,
            store,
            default_interval_secs: config.default_interval_secs,
            default_max_actions: config.default_max_actions_per_hour,
            watchers: Mutex::new(watchers),
            limiter: Mutex::new(EvaluationLimiter::new(config.max_evaluations_per_minute)),
            tasks: Mutex::new(HashMap::new()),
            cycles: Mutex::new(HashMap::new()),
            root: Mutex::new(None),
        })
    }

    // ------------------------------------------------------------------
    // Watcher set
    // ------------------------------------------------------------------

    /// Create, subscribe, persist and (when running) schedule a watcher
    pub async fn create(self: &Arc<Self>, request: NewWatcher) -> Result<String> {
        let NewWatcher {
            name,
            topics,
            instruction,
            sample_interval_sec,
            max_actions_per_hour,
        } = request;

        if topics.is_empty() {
            return Err(WatcherError::NoTopics(name));
        }
        if self.get(&name).is_some() {
            return Err(WatcherError::Duplicate(name));
        }

        for topic in &topics {
            self.bridge.subscribe(topic, None).await?;
        }

        let spec = WatcherSpec {
            name: name.clone(),
            topics,
            instruction,
            sample_interval_sec: clamp_interval(
                sample_interval_sec.unwrap_or(self.default_interval_secs),
            ),
            max_actions_per_hour: max_actions_per_hour.unwrap_or(self.default_max_actions),
            paused: false,
            created_at: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        let message = format!(
            "Watcher '{}' created.\n  Topics: {}\n  Check interval: {}s\n  Instruction: {}\n  Max actions/hour: {}",
            spec.name,
            spec.topics.join(", "),
            spec.sample_interval_sec,
            spec.instruction,
            spec.max_actions_per_hour
        );

        {
            let mut watchers = lock(&self.watchers);
            if watchers.iter().any(|w| w.name() == name) {
                return Err(WatcherError::Duplicate(name));
            }
            watchers.push(Watcher::new(spec));
        }
        self.persist().await;

        if self.is_running() {
            self.spawn_task(&name);
        }
        info!("◆ Created watcher '{}'", name);
        Ok(message)
    }

    /// Drop a watcher and cancel its task
    pub async fn remove(&self, name: &str) -> Result<String> {
        {
            let mut watchers = lock(&self.watchers);
            let before = watchers.len();
            watchers.retain(|w| w.name() != name);
            if watchers.len() == before {
                return Err(WatcherError::NotFound(name.to_string()));
            }
        }
        if let Some(task) = lock(&self.tasks).remove(name) {
            task.cancel();
        }
        lock(&self.cycles).remove(name);
        self.persist().await;
        info!("Removed watcher '{}'", name);
        Ok(format!("Watcher '{name}' removed."))
    }

    /// Pause or resume; the task keeps its schedule either way
    pub async fn set_paused(&self, name: &str, paused: bool) -> Result<String> {
        {
            let mut watchers = lock(&self.watchers);
            let watcher = watchers
                .iter_mut()
                .find(|w| w.name() == name)
                .ok_or_else(|| WatcherError::NotFound(name.to_string()))?;
            watcher.spec.paused = paused;
        }
        self.persist().await;
        let state = if paused { "paused" } else { "resumed" };
        info!("Watcher '{}' {}", name, state);
        Ok(format!("Watcher '{name}' {state}."))
    }

    pub fn get(&self, name: &str) -> Option<Watcher> {
        lock(&self.watchers).iter().find(|w| w.name() == name).cloned()
    }

    pub fn list(&self) -> Vec<Watcher> {
        lock(&self.watchers).clone()
    }

    pub fn describe_all(&self) -> String {
        let watchers = lock(&self.watchers);
        if watchers.is_empty() {
            return "No active watchers.".to_string();
        }
        watchers
            .iter()
            .map(Watcher::describe)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    async fn persist(&self) {
        let specs: Vec<WatcherSpec> = lock(&self.watchers).iter().map(|w| w.spec.clone()).collect();
        if let Err(e) = self.store.save(&specs).await {
            warn!("Failed to save watchers: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Re-subscribe every watcher's topics and start its task
    pub async fn start(self: &Arc<Self>) {
        if self.is_running() {
            return;
        }
        *lock(&self.root) = Some(CancellationToken::new());

        let watchers = self.list();
        for watcher in &watchers {
            for topic in &watcher.spec.topics {
                if let Err(e) = self.bridge.subscribe(topic, None).await {
                    warn!("Watcher '{}' cannot subscribe to {}: {}", watcher.name(), topic, e);
                }
            }
            self.spawn_task(watcher.name());
        }
        info!("◆ Watcher scheduler started ({} watchers)", watchers.len());
    }

    /// Cancel every watcher task
    pub fn stop(&self) {
        if let Some(root) = lock(&self.root).take() {
            root.cancel();
        }
        let tasks: Vec<WatcherTask> = lock(&self.tasks).drain().map(|(_, t)| t).collect();
        let count = tasks.len();
        for task in tasks {
            task.cancel();
        }
        info!("Watcher scheduler stopped ({} tasks cancelled)", count);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.root).is_some()
    }

    /// Number of live watcher tasks
    pub fn task_count(&self) -> usize {
        lock(&self.tasks)
            .values()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    fn spawn_task(self: &Arc<Self>, name: &str) {
        let Some(token) = lock(&self.root).as_ref().map(CancellationToken::child_token) else {
            return;
        };
        let handle = tokio::spawn(run_watcher(
            Arc::downgrade(self),
            name.to_string(),
            token.clone(),
        ));
        if let Some(previous) = lock(&self.tasks).insert(name.to_string(), WatcherTask { token, handle }) {
            previous.cancel();
        }
    }

    fn interval_of(&self, name: &str) -> Option<Duration> {
        lock(&self.watchers)
            .iter()
            .find(|w| w.name() == name)
            .map(|w| Duration::from_secs(w.spec.sample_interval_sec))
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Run one cycle immediately, without waiting for the interval
    pub async fn evaluate_now(&self, name: &str) -> CycleOutcome {
        self.evaluate_cycle(name).await
    }

    fn cycle_gate(&self, name: &str) -> Arc<AsyncMutex<()>> {
        lock(&self.cycles).entry(name.to_string()).or_default().clone()
    }

    async fn evaluate_cycle(&self, name: &str) -> CycleOutcome {
        // Held for the whole cycle: the budget is read, spent and written back under it
        let gate = self.cycle_gate(name);
        let _cycle = gate.lock().await;

        let (spec, history, mut budget) = {
            let watchers = lock(&self.watchers);
            let Some(watcher) = watchers.iter().find(|w| w.name() == name) else {
                return CycleOutcome::NotFound;
            };
            if watcher.spec.paused {
                return CycleOutcome::Paused;
            }
            (
                watcher.spec.clone(),
                watcher.format_recent_history(HISTORY_IN_PROMPT),
                watcher.budget,
            )
        };

        if !lock(&self.limiter).try_acquire() {
            debug!("Evaluation budget spent, skipping '{}'", name);
            return CycleOutcome::RateLimited;
        }

        let snapshot = self.snapshot(&spec.topics);
        if snapshot.is_empty() {
            debug!("No data yet for watcher '{}'", name);
            return CycleOutcome::NoData;
        }

        let observe_only = !budget.can_act();
        let catalog = if observe_only {
            Catalog::Withheld
        } else {
            Catalog::Subset(WATCHER_CAPABILITIES.iter().map(|s| s.to_string()).collect())
        };
        let messages = vec![
            Message::system(self.context.build_watcher_context().await),
            Message::user(evaluation_prompt(&spec, &snapshot, &history, observe_only)),
        ];

        let outcome = self.tool_loop.run(messages, &catalog, Some(&mut budget)).await;

        let mut watchers = lock(&self.watchers);
        let Some(watcher) = watchers.iter_mut().find(|w| w.name() == name) else {
            return CycleOutcome::NotFound;
        };
        watcher.budget = budget;

        if outcome.status == LoopStatus::ProviderFailed {
            error!("Watcher '{}' evaluation failed: {}", name, outcome.text);
            return CycleOutcome::Failed(outcome.text);
        }
        if !outcome.actions.is_empty() {
            info!("Watcher '{}' took actions: {:?}", name, outcome.actions);
        }
        let evaluation = WatcherEvaluation::new(Value::Object(snapshot), outcome.text, outcome.actions);
        watcher.record(evaluation.clone());
        CycleOutcome::Evaluated(evaluation)
    }

    /// Latest decoded sample per topic that has data
    fn snapshot(&self, topics: &[String]) -> Map<String, Value> {
        topics
            .iter()
            .filter_map(|topic| {
                let sample = self.bridge.get_latest(topic)?;
                Some((topic.clone(), self.bridge.decode_sample(&sample).to_value()))
            })
            .collect()
    }
}

fn evaluation_prompt(
    spec: &WatcherSpec,
    snapshot: &Map<String, Value>,
    history: &str,
    observe_only: bool,
) -> String {
    let data = serde_json::to_string_pretty(snapshot).unwrap_or_default();
    let rate_note = if observe_only { RATE_NOTE } else { "" };
    format!(
        r#"You are monitoring the following data streams.

WATCHER: "{}"
YOUR INSTRUCTION: {}

CURRENT DATA:
{}

PREVIOUS EVALUATIONS:
{}
{}
Based on this data and your instruction, decide:
1. Is any action needed right now? If yes, use your tools.
2. Brief assessment (1-2 sentences) for the log.

If no action needed, just respond with your assessment."#,
        spec.name, spec.instruction, data, history, rate_note
    )
}

async fn run_watcher(scheduler: Weak<WatcherScheduler>, name: String, token: CancellationToken) {
    debug!("Watcher task '{}' started", name);
    loop {
        let Some(interval) = scheduler.upgrade().and_then(|s| s.interval_of(&name)) else {
            break;
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(strong) = scheduler.upgrade() else {
            break;
        };
        let outcome = tokio::select! {
            _ = token.cancelled() => break,
            outcome = strong.evaluate_cycle(&name) => outcome,
        };
        match outcome {
            CycleOutcome::NotFound => break,
            CycleOutcome::Failed(e) => warn!("Watcher '{}' cycle aborted: {}", name, e),
            CycleOutcome::Evaluated(eval) => debug!("Watcher '{}': {}", name, eval.assessment),
            other => debug!("Watcher '{}' skipped: {:?}", name, other),
        }
    }
    debug!("Watcher task '{}' exited", name);
}

impl StatusSection for WatcherScheduler {
    fn title(&self) -> &str {
        "Active Watchers"
    }

    fn render(&self) -> Option<String> {
        if lock(&self.watchers).is_empty() {
            return None;
        }
        Some(self.describe_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evaluation_prompt_includes_note_only_when_observing() {
        let spec = WatcherSpec {
            name: "temp".to_string(),
            topics: vec!["sensors/temp".to_string()],
            instruction: "restart camera above 80C".to_string(),
            sample_interval_sec: 30,
            max_actions_per_hour: 2,
            paused: false,
            created_at: 0.0,
        };
        let mut snapshot = Map::new();
        snapshot.insert("sensors/temp".to_string(), json!({"celsius": 85}));

        let acting = evaluation_prompt(&spec, &snapshot, "No previous evaluations.", false);
        assert!(acting.contains("WATCHER: \"temp\""));
        assert!(acting.contains("\"celsius\": 85"));
        assert!(!acting.contains("Observe only"));

        let observing = evaluation_prompt(&spec, &snapshot, "No previous evaluations.", true);
        assert!(observing.contains(RATE_NOTE));
    }
}
