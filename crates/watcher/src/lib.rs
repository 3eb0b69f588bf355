//! Model-driven watchers over live topics
//!
//! A watcher is a named instruction attached to a set of topics. The
//! scheduler re-evaluates each watcher on its own interval through a short
//! tool-calling loop, under a shared evaluations-per-minute budget and a
//! per-watcher actions-per-hour budget.

use thiserror::Error;

pub mod capabilities;
pub mod limiter;
pub mod model;
pub mod scheduler;
pub mod store;

pub use capabilities::register_watcher_capabilities;
pub use limiter::EvaluationLimiter;
pub use model::{NewWatcher, Watcher, WatcherEvaluation, WatcherSpec};
pub use scheduler::{CycleOutcome, WatcherScheduler, WATCHER_CAPABILITIES};
pub use store::WatcherStore;

/// Watcher errors
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Watcher '{0}' already exists. Remove it first.")]
    Duplicate(String),

    #[error("Watcher '{0}' not found.")]
    NotFound(String),

    #[error("Watcher '{0}' needs at least one topic.")]
    NoTopics(String),

    #[error("invalid topic for watcher: {0}")]
    Bridge(#[from] nodewarden_bridge::BridgeError),

    #[error("watcher store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher store parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WatcherError>;
