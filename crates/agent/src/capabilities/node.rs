//! Node management through the fleet daemon API

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use nodewarden_bridge::TopicBridge;

use crate::registry::{no_parameters, parse_args, Capability, CapabilityKind};
use crate::world::WorldModel;
use crate::CapabilityError;

const GROUP: &str = "node-management";

#[derive(Deserialize)]
struct NodeArgs {
    name: String,
}

fn node_parameters(verb: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": format!("Node name to {verb}.") }
        },
        "required": ["name"]
    })
}

/// Lifecycle command sent to `nodes/{name}/command`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCommand {
    Start,
    Stop,
    Restart,
    Build,
}

impl NodeCommand {
    pub const ALL: [NodeCommand; 4] = [
        NodeCommand::Start,
        NodeCommand::Stop,
        NodeCommand::Restart,
        NodeCommand::Build,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeCommand::Start => "start",
            NodeCommand::Stop => "stop",
            NodeCommand::Restart => "restart",
            NodeCommand::Build => "build",
        }
    }

    fn capability_name(&self) -> &'static str {
        match self {
            NodeCommand::Start => "start_node",
            NodeCommand::Stop => "stop_node",
            NodeCommand::Restart => "restart_node",
            NodeCommand::Build => "build_node",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            NodeCommand::Start => "Start a stopped node.",
            NodeCommand::Stop => "Stop a running node. Protected nodes cannot be stopped.",
            NodeCommand::Restart => {
                "Restart a node (stop then start). Protected nodes cannot be restarted."
            }
            NodeCommand::Build => "Build/rebuild a node (install deps, compile).",
        }
    }

    /// Build is allowed on protected nodes
    fn respects_protection(&self) -> bool {
        !matches!(self, NodeCommand::Build)
    }
}

/// `start_node`, `stop_node`, `restart_node` or `build_node`
pub struct NodeCommandCapability {
    command: NodeCommand,
    world: Arc<WorldModel>,
    protected_nodes: Vec<String>,
}

impl NodeCommandCapability {
    pub fn new(command: NodeCommand, world: Arc<WorldModel>, protected_nodes: Vec<String>) -> Self {
        Self {
            command,
            world,
            protected_nodes,
        }
    }
}

#[async_trait]
impl Capability for NodeCommandCapability {
    fn name(&self) -> &str {
        self.command.capability_name()
    }
    fn description(&self) -> &str {
        self.command.description()
    }
    fn parameters(&self) -> Value {
        node_parameters(self.command.as_str())
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: NodeArgs = parse_args(args)?;
        if self.command.respects_protection() && self.protected_nodes.contains(&args.name) {
            return Ok(format!("Cannot modify protected node '{}'.", args.name));
        }

        info!("◆ Node command: {} {}", self.command.as_str(), args.name);
        let payload = json!({ "command": self.command.as_str() }).to_string();
        let outcome = self
            .world
            .bridge()
            .query_daemon(&format!("nodes/{}/command", args.name), Some(payload.into_bytes()))
            .await;

        if self.command != NodeCommand::Build {
            self.world.refresh().await;
        }
        Ok(outcome.to_string())
    }
}

/// Refreshed node table
pub struct ListNodesCapability {
    world: Arc<WorldModel>,
}

impl ListNodesCapability {
    pub fn new(world: Arc<WorldModel>) -> Self {
        Self { world }
    }
}

#[async_trait]
impl Capability for ListNodesCapability {
    fn name(&self) -> &str {
        "list_nodes"
    }
    fn description(&self) -> &str {
        "List all registered nodes with status, health, and description."
    }
    fn parameters(&self) -> Value {
        no_parameters()
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, _args: Value) -> Result<String, CapabilityError> {
        self.world.refresh().await;
        Ok(self.world.to_text())
    }
}

/// Recent logs of a node
pub struct NodeLogsCapability {
    bridge: Arc<TopicBridge>,
}

impl NodeLogsCapability {
    pub fn new(bridge: Arc<TopicBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Capability for NodeLogsCapability {
    fn name(&self) -> &str {
        "get_logs"
    }
    fn description(&self) -> &str {
        "Get recent logs from a node."
    }
    fn parameters(&self) -> Value {
        node_parameters("get logs for")
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: NodeArgs = parse_args(args)?;
        let outcome = self
            .bridge
            .query_daemon(&format!("nodes/{}/logs", args.name), None)
            .await;
        Ok(outcome.to_string())
    }
}
