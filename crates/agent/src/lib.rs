//! NodeWarden agent core
//!
//! Capability registry, the bounded tool-calling loop, the interactive agent,
//! prompt assembly and the fleet world model.

use nodewarden_bridge::BridgeError;
use nodewarden_session::SessionError;
use thiserror::Error;

pub mod agent;
pub mod capabilities;
pub mod context;
pub mod registry;
pub mod tool_loop;
pub mod world;

pub use agent::{Agent, AgentReply};
pub use capabilities::register_core_capabilities;
pub use context::{ContextBuilder, StatusSection};
pub use registry::{
    no_parameters, parse_args, to_provider_tool, Capability, CapabilityKind, CapabilityRegistry,
};
pub use tool_loop::{
    ActionBudget, Catalog, LoopOutcome, LoopStatus, ToolLoop, EMPTY_RESPONSE, MAX_TURNS_NOTICE,
};
pub use world::{NodeInfo, WorldModel};

/// Failure inside a capability handler
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("invalid arguments - {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CapabilityError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
