//! Path utilities

use std::path::{Path, PathBuf};

/// Root data directory (~/.nodewarden)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nodewarden")
}

/// Configuration file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Agent state directory: watchers, captures, memory, conversations
pub fn agent_dir() -> PathBuf {
    data_dir().join("agent")
}

/// Persisted watcher set
pub fn watchers_path(agent_dir: &Path) -> PathBuf {
    agent_dir.join("watchers.json")
}

/// Persisted capture set
pub fn captures_path(agent_dir: &Path) -> PathBuf {
    agent_dir.join("captures.json")
}

/// Conversation logs
pub fn conversations_dir(agent_dir: &Path) -> PathBuf {
    agent_dir.join("conversations")
}

/// Memory notes file
pub fn memory_path(agent_dir: &Path) -> PathBuf {
    agent_dir.join("MEMORY.md")
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Sanitize an identifier for use as a file name
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect()
}
