//! Live fleet state for prompts and status tools

use nodewarden_bridge::{QueryOutcome, TopicBridge};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

/// Tracked state of a single node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub status: String,
    pub health: String,
    pub version: String,
    pub description: String,
    pub node_type: String,
    pub installed: bool,
    pub autostart: bool,
    pub machine_id: String,
}

fn status_name(code: i64) -> String {
    match code {
        0 => "unknown",
        1 => "stopped",
        2 => "running",
        3 => "failed",
        4 => "installing",
        5 => "building",
        6 => "not_installed",
        other => return other.to_string(),
    }
    .to_string()
}

fn health_name(code: i64) -> String {
    match code {
        0 => "unknown",
        1 => "healthy",
        2 => "unhealthy",
        other => return other.to_string(),
    }
    .to_string()
}

/// Status and health arrive either as names or as integer codes
fn label(value: &Value, by_code: fn(i64) -> String) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.as_i64().map(by_code).unwrap_or_else(|| n.to_string()),
        _ => "unknown".to_string(),
    }
}

fn str_field(node: &Value, key: &str) -> String {
    node.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

impl NodeInfo {
    fn from_json(node: &Value) -> Option<Self> {
        let name = str_field(node, "name");
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name,
            status: label(node.get("status").unwrap_or(&Value::Null), status_name),
            health: label(node.get("health_status").unwrap_or(&Value::Null), health_name),
            version: str_field(node, "version"),
            description: str_field(node, "description"),
            node_type: str_field(node, "node_type"),
            installed: node.get("installed").and_then(Value::as_bool).unwrap_or(false),
            autostart: node
                .get("autostart_enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            machine_id: str_field(node, "machine_id"),
        })
    }
}

#[derive(Default)]
struct WorldState {
    nodes: BTreeMap<String, NodeInfo>,
    daemon_healthy: Option<bool>,
}

/// Node table and daemon health, refreshed from the fleet daemon
pub struct WorldModel {
    bridge: Arc<TopicBridge>,
    state: RwLock<WorldState>,
}

impl WorldModel {
    pub fn new(bridge: Arc<TopicBridge>) -> Self {
        Self {
            bridge,
            state: RwLock::new(WorldState::default()),
        }
    }

    pub fn bridge(&self) -> &Arc<TopicBridge> {
        &self.bridge
    }

    /// Re-query the node list and daemon health
    pub async fn refresh(&self) {
        match self.bridge.query_daemon("nodes", None).await.first_ok() {
            Some(body) => {
                if let Err(e) = self.apply_node_list(&body) {
                    warn!("Failed to parse node list response: {}", e);
                }
            }
            None => debug!("Daemon did not answer the node list query"),
        }

        let healthy = matches!(
            self.bridge.query_daemon("health", None).await,
            QueryOutcome::Replies(ref r) if !r.is_empty()
        );
        self.write().daemon_healthy = Some(healthy);
    }

    /// Replace the node table from a daemon `nodes` reply
    ///
    /// Accepts a bare list or an object with a `nodes` list. Nodes missing
    /// from the reply are dropped.
    pub fn apply_node_list(&self, body: &str) -> Result<usize, serde_json::Error> {
        let data: Value = serde_json::from_str(body)?;
        let entries = match &data {
            Value::Array(items) => items.as_slice(),
            Value::Object(obj) => obj
                .get("nodes")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            _ => {
                error!("Unexpected node list shape");
                &[]
            }
        };

        let nodes: BTreeMap<String, NodeInfo> = entries
            .iter()
            .filter_map(NodeInfo::from_json)
            .map(|n| (n.name.clone(), n))
            .collect();
        let count = nodes.len();
        self.write().nodes = nodes;
        debug!("World model refreshed: {} nodes", count);
        Ok(count)
    }

    pub fn set_daemon_healthy(&self, healthy: bool) {
        self.write().daemon_healthy = Some(healthy);
    }

    pub fn get_node(&self, name: &str) -> Option<NodeInfo> {
        self.read().nodes.get(name).cloned()
    }

    pub fn running_nodes(&self) -> Vec<NodeInfo> {
        self.read()
            .nodes
            .values()
            .filter(|n| n.status == "running")
            .cloned()
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Render for the system prompt
    pub fn to_text(&self) -> String {
        let state = self.read();
        let scope = self.bridge.scope();
        let mut lines = vec![
            match state.daemon_healthy {
                Some(true) => "Daemon: healthy".to_string(),
                Some(false) => "Daemon: NOT RESPONDING".to_string(),
                None => "Daemon: unknown (not yet checked)".to_string(),
            },
            format!("Machine: {} | Scope: {}", scope.machine_id, scope.scope),
            String::new(),
        ];

        if state.nodes.is_empty() {
            lines.push("No nodes registered.".to_string());
            return lines.join("\n");
        }

        let count = |status: &str| state.nodes.values().filter(|n| n.status == status).count();
        let unhealthy = state.nodes.values().filter(|n| n.health == "unhealthy").count();
        lines.push(format!(
            "Nodes: {} total ({} running, {} stopped, {} failed)",
            state.nodes.len(),
            count("running"),
            count("stopped"),
            count("failed")
        ));
        if unhealthy > 0 {
            lines.push(format!("WARNING: {unhealthy} node(s) unhealthy"));
        }
        lines.push(String::new());

        lines.push(format!(
            "{:<25} {:<12} {:<10} {:<8} Description",
            "Name", "Status", "Health", "Type"
        ));
        lines.push("-".repeat(80));
        for node in state.nodes.values() {
            let description: String = node.description.chars().take(40).collect();
            lines.push(format!(
                "{:<25} {:<12} {:<10} {:<8} {}",
                node.name, node.status, node.health, node.node_type, description
            ));
        }

        let buffered = self.bridge.buffered_topics();
        if !buffered.is_empty() {
            lines.push(String::new());
            lines.push("Active data topics (with buffered samples):".to_string());
            for (topic, samples) in buffered {
                lines.push(format!("  {topic} ({samples} samples)"));
            }
        }

        lines.join("\n")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, WorldState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, WorldState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
