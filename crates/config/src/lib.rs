//! Configuration management for NodeWarden
//!
//! Loads and saves agent parameters from `~/.nodewarden/config.json`. Every
//! field has a serde default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{agent_dir, config_path, data_dir};

/// Environment override for the topic scope
pub const SCOPE_ENV: &str = "NODEWARDEN_SCOPE";
/// Environment override for the machine id
pub const MACHINE_ID_ENV: &str = "NODEWARDEN_MACHINE_ID";

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

/// Messaging substrate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            machine_id: None,
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_scope() -> String {
    "local".to_string()
}

fn default_query_timeout() -> u64 {
    5
}

impl TransportConfig {
    /// Scope with the environment override applied
    pub fn resolved_scope(&self) -> String {
        std::env::var(SCOPE_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.scope.clone())
    }

    /// Machine id: environment, then config, then host name
    pub fn resolved_machine_id(&self) -> String {
        if let Some(id) = std::env::var(MACHINE_ID_ENV).ok().filter(|s| !s.is_empty()) {
            return id;
        }
        if let Some(id) = self.machine_id.as_ref().filter(|s| !s.is_empty()) {
            return id.clone();
        }
        hostname()
    }
}

fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Interactive agent parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_turns")]
    pub max_turns: u32,
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_agent_turns(),
            history_messages: default_history_messages(),
        }
    }
}

fn default_agent_turns() -> u32 {
    20
}

fn default_history_messages() -> usize {
    20
}

/// Watcher scheduler parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Cheaper model for watcher evaluations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_base_url: Option<String>,
    #[serde(default = "default_evals_per_minute")]
    pub max_evaluations_per_minute: u32,
    #[serde(default = "default_watcher_turns")]
    pub max_turns: u32,
    #[serde(default = "default_interval")]
    pub default_interval_secs: u64,
    #[serde(default = "default_actions_per_hour")]
    pub default_max_actions_per_hour: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            eval_model: None,
            eval_base_url: None,
            max_evaluations_per_minute: default_evals_per_minute(),
            max_turns: default_watcher_turns(),
            default_interval_secs: default_interval(),
            default_max_actions_per_hour: default_actions_per_hour(),
        }
    }
}

fn default_evals_per_minute() -> u32 {
    10
}

fn default_watcher_turns() -> u32 {
    5
}

fn default_interval() -> u64 {
    30
}

fn default_actions_per_hour() -> u32 {
    10
}

/// Safety boundaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_protected_nodes")]
    pub protected_nodes: Vec<String>,
    #[serde(default = "default_allowed_paths")]
    pub allowed_data_paths: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            protected_nodes: default_protected_nodes(),
            allowed_data_paths: default_allowed_paths(),
        }
    }
}

fn default_protected_nodes() -> Vec<String> {
    vec!["nodewarden-agent".to_string()]
}

fn default_allowed_paths() -> Vec<String> {
    vec!["/data/".to_string(), "/tmp/nodewarden/".to_string()]
}

/// Health heartbeat parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_refresh")]
    pub refresh_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_heartbeat_interval(),
            refresh_secs: default_refresh(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_refresh() -> u64 {
    30
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Topic suffix -> schema type name, used for binary decoding
    #[serde(default)]
    pub topics: HashMap<String, String>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub watchers: WatcherConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("Loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("Saving config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// API key for the model backend, if any
    pub fn api_key(&self) -> Option<String> {
        if self.provider.api_key.is_empty() {
            None
        } else {
            Some(self.provider.api_key.clone())
        }
    }

    /// Model used for watcher evaluations
    pub fn watcher_model(&self) -> String {
        self.watchers
            .eval_model
            .clone()
            .unwrap_or_else(|| self.provider.model.clone())
    }

    /// Backend base URL used for watcher evaluations
    pub fn watcher_api_base(&self) -> String {
        self.watchers
            .eval_base_url
            .clone()
            .unwrap_or_else(|| self.provider.api_base.clone())
    }
}

/// Create the default config (if absent) and the agent directory
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("Config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("Created config at {:?}", config_path);
    }

    let agent = agent_dir();
    tokio::fs::create_dir_all(&agent).await?;
    info!("Agent directory ready at {:?}", agent);

    Config::load().await
}
