//! Built-in capabilities: topics, node management, memory, system diagnostics

use std::sync::Arc;

use nodewarden_bridge::TopicBridge;
use nodewarden_config::SafetyConfig;
use nodewarden_session::MemoryNotes;

use crate::registry::CapabilityRegistry;
use crate::world::WorldModel;

pub mod memory;
pub mod node;
pub mod system;
pub mod topic;

pub use memory::{ForgetCapability, RecallCapability, RememberCapability};
pub use node::{NodeCommand, NodeCommandCapability, NodeLogsCapability, ListNodesCapability};
pub use system::{MachineInfoCapability, SystemHealthCapability, WorldStateCapability};
pub use topic::{PublishMessageCapability, QueryTopicCapability, SubscribeTopicCapability};

/// Register every capability that only needs the bridge, world model and memory
pub fn register_core_capabilities(
    registry: &CapabilityRegistry,
    bridge: Arc<TopicBridge>,
    world: Arc<WorldModel>,
    memory: Arc<MemoryNotes>,
    safety: &SafetyConfig,
) {
    registry.register(SubscribeTopicCapability::new(bridge.clone()));
    registry.register(QueryTopicCapability::new(bridge.clone()));
    registry.register(PublishMessageCapability::new(bridge.clone()));

    registry.register(ListNodesCapability::new(world.clone()));
    for command in NodeCommand::ALL {
        registry.register(NodeCommandCapability::new(
            command,
            world.clone(),
            safety.protected_nodes.clone(),
        ));
    }
    registry.register(NodeLogsCapability::new(bridge.clone()));

    registry.register(RememberCapability::new(memory.clone()));
    registry.register(RecallCapability::new(memory.clone()));
    registry.register(ForgetCapability::new(memory));

    registry.register(SystemHealthCapability::new(world.clone()));
    registry.register(WorldStateCapability::new(world));
    registry.register(MachineInfoCapability::default());
}
