//! Context builder for assembling agent prompts
//!
//! Every prompt is rendered from live state on each call; nothing is cached.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

use nodewarden_config::SafetyConfig;
use nodewarden_provider::Message;
use nodewarden_session::MemoryNotes;

use crate::registry::CapabilityRegistry;
use crate::world::WorldModel;

/// A block of runtime state contributed by a downstream component
pub trait StatusSection: Send + Sync {
    fn title(&self) -> &str;

    /// `None` when there is nothing worth showing
    fn render(&self) -> Option<String>;
}

/// Builds system prompts for the interactive agent and for watchers
pub struct ContextBuilder {
    agent_dir: PathBuf,
    world: Arc<WorldModel>,
    registry: Arc<CapabilityRegistry>,
    memory: Option<Arc<MemoryNotes>>,
    safety: SafetyConfig,
    max_actions_per_hour: u32,
    sections: RwLock<Vec<Arc<dyn StatusSection>>>,
}

impl ContextBuilder {
    /// Identity file, read from the agent directory
    const IDENTITY_FILE: &'static str = "SOUL.md";

    const DEFAULT_IDENTITY: &'static str =
        "# NodeWarden Agent\nYou are an autonomous agent managing a fleet of software nodes.";

    pub fn new(
        agent_dir: impl AsRef<Path>,
        world: Arc<WorldModel>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            agent_dir: agent_dir.as_ref().to_path_buf(),
            world,
            registry,
            memory: None,
            safety: SafetyConfig::default(),
            max_actions_per_hour: 10,
            sections: RwLock::new(Vec::new()),
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryNotes>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_safety(mut self, safety: SafetyConfig, max_actions_per_hour: u32) -> Self {
        self.safety = safety;
        self.max_actions_per_hour = max_actions_per_hour;
        self
    }

    /// Register a status provider; sections render in registration order
    pub fn add_section(&self, section: Arc<dyn StatusSection>) {
        self.sections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(section);
    }

    pub fn world(&self) -> &Arc<WorldModel> {
        &self.world
    }

    async fn identity(&self) -> Option<String> {
        let path = self.agent_dir.join(Self::IDENTITY_FILE);
        if !path.exists() {
            return None;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => Some(content.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                debug!("Failed to read {}: {}", Self::IDENTITY_FILE, e);
                None
            }
        }
    }

    fn status_sections(&self) -> Vec<String> {
        let sections = self.sections.read().unwrap_or_else(|e| e.into_inner());
        sections
            .iter()
            .filter_map(|s| s.render().map(|body| format!("## {}\n{}", s.title(), body)))
            .collect()
    }

    /// Full system prompt for the interactive agent
    pub async fn build_system_prompt(&self) -> String {
        let mut parts = vec![self
            .identity()
            .await
            .unwrap_or_else(|| Self::DEFAULT_IDENTITY.to_string())];

        parts.push(format!("## Current System State\n{}", self.world.to_text()));
        parts.extend(self.status_sections());
        parts.push(format!(
            "## Your Capabilities\nYou have these tools available:\n{}",
            self.registry.describe_all()
        ));

        if let Some(memory) = &self.memory {
            match memory.get_all().await {
                Ok(notes) if !notes.is_empty() => {
                    parts.push(format!("## Memory (Your Persistent Learnings)\n{notes}"))
                }
                Ok(_) => {}
                Err(e) => debug!("Failed to read memory notes: {}", e),
            }
        }

        parts.push(self.safety_rules());
        parts.join("\n\n")
    }

    fn safety_rules(&self) -> String {
        format!(
            r#"## Safety Rules
- You can freely read data and check status (READ operations)
- For actions that change system state (start/stop/restart nodes), explain what you'll do first
- Never stop these protected nodes: {}
- Data can only be saved to: {}
- Maximum {} automated actions per hour per watcher
- Always confirm destructive actions with the user unless in a watcher with clear instructions"#,
            self.safety.protected_nodes.join(", "),
            self.safety.allowed_data_paths.join(", "),
            self.max_actions_per_hour
        )
    }

    /// Short prompt for watcher evaluations
    pub async fn build_watcher_context(&self) -> String {
        let mut parts = Vec::new();
        if let Some(identity) = self.identity().await {
            // first section only
            let first = identity.split("\n##").next().unwrap_or_default().trim();
            parts.push(first.to_string());
        }
        parts.push(format!("## System State (Summary)\n{}", self.world.to_text()));
        parts.push(
            "## Available Actions\nYou can use tools to take action when conditions are met.\nBe conservative - only act when clearly needed."
                .to_string(),
        );
        parts.join("\n\n")
    }

    /// System prompt + history + the new user message
    pub async fn build_messages(&self, history: Vec<Message>, current_message: &str) -> Vec<Message> {
        let system_prompt = self.build_system_prompt().await;

        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(history);
        messages.push(Message::user(current_message));

        messages
    }
}
