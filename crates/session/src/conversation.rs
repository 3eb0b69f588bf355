//! Append-only conversation logs
//!
//! One `<id>.jsonl` file per conversation. Only user and assistant turns are
//! stored; tool scaffolding stays in memory for the duration of one exchange.

use chrono::{DateTime, Local};
use nodewarden_provider::Message;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::Result;

/// Turns loaded into a single reasoning call
pub const DEFAULT_HISTORY: usize = 20;

/// One durable turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Local::now(),
        }
    }

    fn is_durable(role: &str) -> bool {
        matches!(role, "user" | "assistant")
    }
}

/// Conversation logs under one directory
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Fresh 8-character conversation id
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    fn path(&self, id: &str) -> PathBuf {
        let safe = id.replace(['/', '\\', ':', '.'], "_");
        self.dir.join(format!("{safe}.jsonl"))
    }

    /// Append one turn; returns false for non-durable roles
    pub async fn append(&self, id: &str, role: &str, content: &str) -> Result<bool> {
        if !Turn::is_durable(role) {
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(&Turn::new(role, content))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!("Appended {} turn to conversation {}", role, id);
        Ok(true)
    }

    /// All stored turns; unreadable lines are skipped
    pub async fn load(&self, id: &str) -> Result<Vec<Turn>> {
        let path = self.path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let turns = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<Turn>(l) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    warn!("Skipping bad line in conversation {}: {}", id, e);
                    None
                }
            })
            .collect();
        Ok(turns)
    }

    /// Most recent `max` turns as model messages
    pub async fn history(&self, id: &str, max: usize) -> Result<Vec<Message>> {
        let turns = self.load(id).await?;
        Ok(turns
            .iter()
            .skip(turns.len().saturating_sub(max))
            .map(|t| match t.role.as_str() {
                "user" => Message::user(&t.content),
                _ => Message::assistant(&t.content),
            })
            .collect())
    }

    /// Stored conversation ids
    pub async fn list(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(id) = name.strip_suffix(".jsonl") {
                        ids.push(id.to_string());
                    }
                }
            }
        }
        ids.sort();
        ids
    }
}
