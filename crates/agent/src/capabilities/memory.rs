//! Memory capabilities over `MEMORY.md`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use nodewarden_session::MemoryNotes;

use crate::registry::{parse_args, Capability, CapabilityKind};
use crate::CapabilityError;

const GROUP: &str = "memory";

pub struct RememberCapability {
    memory: Arc<MemoryNotes>,
}

impl RememberCapability {
    pub fn new(memory: Arc<MemoryNotes>) -> Self {
        Self { memory }
    }
}

#[derive(Deserialize)]
struct RememberArgs {
    content: String,
    #[serde(default = "default_category")]
    category: String,
}

fn default_category() -> String {
    "general".to_string()
}

#[async_trait]
impl Capability for RememberCapability {
    fn name(&self) -> &str {
        "remember"
    }
    fn description(&self) -> &str {
        "Store a piece of information in persistent memory (survives restarts)."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "What to remember. Be specific and concise." },
                "category": { "type": "string", "description": "Category: 'patterns', 'preferences', 'issues', 'general'." }
            },
            "required": ["content"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: RememberArgs = parse_args(args)?;
        Ok(self.memory.remember(&args.content, &args.category).await?)
    }
}

pub struct RecallCapability {
    memory: Arc<MemoryNotes>,
}

impl RecallCapability {
    pub fn new(memory: Arc<MemoryNotes>) -> Self {
        Self { memory }
    }
}

#[derive(Deserialize)]
struct RecallArgs {
    query: String,
}

#[async_trait]
impl Capability for RecallCapability {
    fn name(&self) -> &str {
        "recall"
    }
    fn description(&self) -> &str {
        "Search persistent memory for relevant information."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to search for." }
            },
            "required": ["query"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: RecallArgs = parse_args(args)?;
        Ok(self.memory.recall(&args.query).await?)
    }
}

pub struct ForgetCapability {
    memory: Arc<MemoryNotes>,
}

impl ForgetCapability {
    pub fn new(memory: Arc<MemoryNotes>) -> Self {
        Self { memory }
    }
}

#[derive(Deserialize)]
struct ForgetArgs {
    content: String,
}

#[async_trait]
impl Capability for ForgetCapability {
    fn name(&self) -> &str {
        "forget"
    }
    fn description(&self) -> &str {
        "Remove information from persistent memory."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Description of what to forget (matched and removed)." }
            },
            "required": ["content"]
        })
    }
    fn group(&self) -> &str {
        GROUP
    }
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Action
    }
    async fn execute(&self, args: Value) -> Result<String, CapabilityError> {
        let args: ForgetArgs = parse_args(args)?;
        Ok(self.memory.forget(&args.content).await?)
    }
}
