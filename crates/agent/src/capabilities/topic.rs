//! Topic capabilities: read, query and publish through the bridge

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use nodewarden_bridge::{Decoded, TopicBridge};

use crate::registry::{parse_args, Capability, CapabilityKind};
use crate::CapabilityError;

const GROUP: &str = "topics";

/// Subscribe (idempotently) and return the latest decoded sample
pub struct SubscribeTopicCapability {
    bridge: Arc<TopicBridge>,
}

impl SubscribeTopicCapability {
    pub fn new(bridge: Arc<TopicBridge>) -> Self {
        Self { bridge }
    }
}

#[derive(Deserialize)]
struct TopicArgs {
    topic: String,
}

#[async_trait]
impl Capability for SubscribeTopicCapability {
    fn name(&self) -> &str {
        "subscribe_topic"
    }
    fn description(&self) -> &str {
        "Subscribe to a topic and get its latest data. Topic is a suffix like 'system-telemetry/metrics'."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "Topic suffix (e.g., 'system-telemetry/metrics'). Will be scoped automatically."
                }
            },
            "required": ["topic"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: TopicArgs = parse_args(args)?;
        let key = self.bridge.subscribe(&args.topic, None).await?;

        let Some(sample) = self.bridge.get_latest_by_key(&key) else {
            return Ok(format!(
                "Subscribed to '{}' but no data received yet. Data will be available on next check.",
                args.topic
            ));
        };

        Ok(match self.bridge.decode_sample(&sample) {
            decoded @ (Decoded::Json(_) | Decoded::Schema { .. }) => {
                serde_json::to_string_pretty(&decoded.to_value())
                    .unwrap_or_else(|_| decoded.to_string())
            }
            other => other.to_string(),
        })
    }
}

/// One-shot request/reply on a key expression
pub struct QueryTopicCapability {
    bridge: Arc<TopicBridge>,
}

impl QueryTopicCapability {
    pub fn new(bridge: Arc<TopicBridge>) -> Self {
        Self { bridge }
    }
}

#[derive(Deserialize)]
struct QueryArgs {
    key: String,
    #[serde(default)]
    payload: Option<String>,
}

#[async_trait]
impl Capability for QueryTopicCapability {
    fn name(&self) -> &str {
        "query_topic"
    }
    fn description(&self) -> &str {
        "Query a key expression (for daemon API or one-shot reads). Use full key for daemon API, suffix for scoped topics."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Key expression to query." },
                "payload": { "type": "string", "description": "Optional JSON payload to send with query." }
            },
            "required": ["key"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: QueryArgs = parse_args(args)?;
        let key = self.bridge.scope().qualify(&args.key);
        let payload = args
            .payload
            .filter(|p| !p.is_empty())
            .map(String::into_bytes);
        let timeout = self.bridge.query_timeout();
        Ok(self.bridge.query(&key, payload, timeout).await.to_string())
    }
}

/// Publish a UTF-8 message on a scoped topic
pub struct PublishMessageCapability {
    bridge: Arc<TopicBridge>,
}

impl PublishMessageCapability {
    pub fn new(bridge: Arc<TopicBridge>) -> Self {
        Self { bridge }
    }
}

#[derive(Deserialize)]
struct PublishArgs {
    topic: String,
    data: String,
}

#[async_trait]
impl Capability for PublishMessageCapability {
    fn name(&self) -> &str {
        "publish_message"
    }
    fn description(&self) -> &str {
        "Publish a message to a topic."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string", "description": "Topic suffix to publish to." },
                "data": { "type": "string", "description": "Message content (string or JSON)." }
            },
            "required": ["topic", "data"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: PublishArgs = parse_args(args)?;
        self.bridge
            .publish(&args.topic, args.data.into_bytes())
            .await?;
        Ok(format!("Published to '{}'", args.topic))
    }
}
