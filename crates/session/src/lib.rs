//! Durable agent state: conversation logs and memory notes

use thiserror::Error;

pub mod conversation;
pub mod memory;

pub use conversation::{ConversationStore, Turn, DEFAULT_HISTORY};
pub use memory::MemoryNotes;

/// Session storage errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
