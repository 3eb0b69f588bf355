//! Capabilities that let the model manage watchers

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};

use nodewarden_agent::{parse_args, Capability, CapabilityError, CapabilityKind, CapabilityRegistry};

use crate::model::NewWatcher;
use crate::scheduler::WatcherScheduler;
use crate::WatcherError;

const GROUP: &str = "watchers";

fn upgrade(scheduler: &Weak<WatcherScheduler>) -> Result<Arc<WatcherScheduler>, CapabilityError> {
    scheduler
        .upgrade()
        .ok_or_else(|| CapabilityError::failed("watcher scheduler is not running"))
}

/// User-facing errors come back as the result text; the rest fail the call
fn render(result: crate::Result<String>) -> Result<String, CapabilityError> {
    match result {
        Ok(text) => Ok(text),
        Err(e @ (WatcherError::Duplicate(_) | WatcherError::NotFound(_) | WatcherError::NoTopics(_))) => {
            Ok(e.to_string())
        }
        Err(e) => Err(CapabilityError::failed(e.to_string())),
    }
}

/// Register create/list/remove/pause watcher capabilities
pub fn register_watcher_capabilities(registry: &CapabilityRegistry, scheduler: &Arc<WatcherScheduler>) {
    let weak = Arc::downgrade(scheduler);
    registry.register(CreateWatcherCapability {
        scheduler: weak.clone(),
    });
    registry.register(ListWatchersCapability {
        scheduler: weak.clone(),
    });
    registry.register(RemoveWatcherCapability {
        scheduler: weak.clone(),
    });
    registry.register(PauseWatcherCapability { scheduler: weak });
}

pub struct CreateWatcherCapability {
    scheduler: Weak<WatcherScheduler>,
}

#[async_trait]
impl Capability for CreateWatcherCapability {
    fn name(&self) -> &str {
        "create_watcher"
    }
    fn description(&self) -> &str {
        "Create a persistent watcher that periodically evaluates topic data against an instruction and may take actions."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Unique watcher name" },
                "topics": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Topics to monitor"
                },
                "instruction": { "type": "string", "description": "What to watch for and what to do about it" },
                "sample_interval_sec": { "type": "integer", "description": "Seconds between evaluations (10-3600)" },
                "max_actions_per_hour": { "type": "integer", "description": "Upper bound on actions per hour" }
            },
            "required": ["name", "topics", "instruction"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let request: NewWatcher = parse_args(args)?;
        let scheduler = upgrade(&self.scheduler)?;
        render(scheduler.create(request).await)
    }
}

pub struct ListWatchersCapability {
    scheduler: Weak<WatcherScheduler>,
}

#[async_trait]
impl Capability for ListWatchersCapability {
    fn name(&self) -> &str {
        "list_watchers"
    }
    fn description(&self) -> &str {
        "List all watchers with their status and last evaluation."
    }
    fn parameters(&self) -> Value {
        nodewarden_agent::no_parameters()
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, _args: Value) -> Result<String, CapabilityError> {
        Ok(upgrade(&self.scheduler)?.describe_all())
    }
}

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

pub struct RemoveWatcherCapability {
    scheduler: Weak<WatcherScheduler>,
}

#[async_trait]
impl Capability for RemoveWatcherCapability {
    fn name(&self) -> &str {
        "remove_watcher"
    }
    fn description(&self) -> &str {
        "Permanently remove a watcher."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Watcher name" }
            },
            "required": ["name"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: NameArgs = parse_args(args)?;
        render(upgrade(&self.scheduler)?.remove(&args.name).await)
    }
}

#[derive(Deserialize)]
struct PauseArgs {
    name: String,
    #[serde(default = "default_paused")]
    paused: bool,
}

fn default_paused() -> bool {
    true
}

pub struct PauseWatcherCapability {
    scheduler: Weak<WatcherScheduler>,
}

#[async_trait]
impl Capability for PauseWatcherCapability {
    fn name(&self) -> &str {
        "pause_watcher"
    }
    fn description(&self) -> &str {
        "Pause or resume a watcher without removing it."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Watcher name" },
                "paused": { "type": "boolean", "description": "true to pause, false to resume (default true)" }
            },
            "required": ["name"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: PauseArgs = parse_args(args)?;
        render(upgrade(&self.scheduler)?.set_paused(&args.name, args.paused).await)
    }
}
