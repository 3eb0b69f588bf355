//! Watcher records and evaluation history

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

use nodewarden_agent::ActionBudget;

/// Smallest allowed sample interval, seconds
pub const MIN_INTERVAL_SECS: u64 = 10;
/// Largest allowed sample interval, seconds
pub const MAX_INTERVAL_SECS: u64 = 3600;

/// History is trimmed to `HISTORY_KEEP` once it grows past `HISTORY_CAP`
pub const HISTORY_CAP: usize = 100;
pub const HISTORY_KEEP: usize = 50;

pub fn clamp_interval(secs: u64) -> u64 {
    secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
}

fn default_interval() -> u64 {
    30
}

fn default_max_actions() -> u32 {
    10
}

fn now_epoch_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// The persisted part of a watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherSpec {
    pub name: String,
    pub topics: Vec<String>,
    pub instruction: String,
    #[serde(default = "default_interval")]
    pub sample_interval_sec: u64,
    #[serde(default = "default_max_actions")]
    pub max_actions_per_hour: u32,
    #[serde(default)]
    pub paused: bool,
    /// Seconds since the Unix epoch
    #[serde(default = "now_epoch_secs")]
    pub created_at: f64,
}

/// Request to create a watcher; unset limits fall back to configured defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWatcher {
    pub name: String,
    pub topics: Vec<String>,
    pub instruction: String,
    #[serde(default)]
    pub sample_interval_sec: Option<u64>,
    #[serde(default)]
    pub max_actions_per_hour: Option<u32>,
}

impl NewWatcher {
    pub fn new(name: impl Into<String>, topics: Vec<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topics,
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    pub fn interval(mut self, secs: u64) -> Self {
        self.sample_interval_sec = Some(secs);
        self
    }

    pub fn max_actions(mut self, per_hour: u32) -> Self {
        self.max_actions_per_hour = Some(per_hour);
        self
    }
}

/// One completed evaluation
#[derive(Debug, Clone)]
pub struct WatcherEvaluation {
    pub timestamp: DateTime<Local>,
    pub data: Value,
    pub assessment: String,
    pub actions: Vec<String>,
}

impl WatcherEvaluation {
    pub fn new(data: Value, assessment: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            timestamp: Local::now(),
            data,
            assessment: assessment.into(),
            actions,
        }
    }

    /// `[HH:MM:SS] assessment | Actions: a, b`
    pub fn log_line(&self) -> String {
        let mut line = format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.assessment);
        if !self.actions.is_empty() {
            line.push_str(&format!(" | Actions: {}", self.actions.join(", ")));
        }
        line
    }
}

/// Live watcher state
#[derive(Debug, Clone)]
pub struct Watcher {
    pub spec: WatcherSpec,
    pub history: VecDeque<WatcherEvaluation>,
    pub budget: ActionBudget,
}

impl Watcher {
    pub fn new(spec: WatcherSpec) -> Self {
        let budget = ActionBudget::new(spec.max_actions_per_hour);
        Self {
            spec,
            history: VecDeque::new(),
            budget,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn record(&mut self, evaluation: WatcherEvaluation) {
        self.history.push_back(evaluation);
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_KEEP;
            self.history.drain(..excess);
        }
    }

    pub fn last_evaluation(&self) -> Option<&WatcherEvaluation> {
        self.history.back()
    }

    /// Last `n` evaluations, one line each
    pub fn format_recent_history(&self, n: usize) -> String {
        if self.history.is_empty() {
            return "No previous evaluations.".to_string();
        }
        let skip = self.history.len().saturating_sub(n);
        self.history
            .iter()
            .skip(skip)
            .map(WatcherEvaluation::log_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Actions used in the current hourly window
    pub fn actions_this_hour(&self) -> u32 {
        let mut budget = self.budget;
        budget.can_act();
        budget.used
    }

    pub fn describe(&self) -> String {
        let status = if self.spec.paused { "PAUSED" } else { "active" };
        let mut lines = vec![
            format!("### {} [{}]", self.spec.name, status),
            format!("  Topics: {}", self.spec.topics.join(", ")),
            format!("  Interval: {}s", self.spec.sample_interval_sec),
            format!("  Instruction: {}", self.spec.instruction),
        ];
        if let Some(last) = self.last_evaluation() {
            lines.push(format!(
                "  Last eval [{}]: {}",
                last.timestamp.format("%H:%M:%S"),
                last.assessment
            ));
        }
        lines.push(format!(
            "  Actions this hour: {}/{}",
            self.actions_this_hour(),
            self.spec.max_actions_per_hour
        ));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> WatcherSpec {
        WatcherSpec {
            name: "temp".to_string(),
            topics: vec!["sensors/temp".to_string()],
            instruction: "restart camera above 80C".to_string(),
            sample_interval_sec: 30,
            max_actions_per_hour: 2,
            paused: false,
            created_at: 0.0,
        }
    }

    #[test]
    fn test_clamp_interval() {
        assert_eq!(clamp_interval(1), 10);
        assert_eq!(clamp_interval(45), 45);
        assert_eq!(clamp_interval(86_400), 3600);
    }

    #[test]
    fn test_history_is_trimmed() {
        let mut watcher = Watcher::new(spec());
        for i in 0..=HISTORY_CAP {
            watcher.record(WatcherEvaluation::new(json!({}), format!("eval {i}"), vec![]));
        }
        assert_eq!(watcher.history.len(), HISTORY_KEEP);
        assert_eq!(watcher.last_evaluation().unwrap().assessment, "eval 100");
    }

    #[test]
    fn test_recent_history_format() {
        let mut watcher = Watcher::new(spec());
        assert_eq!(watcher.format_recent_history(5), "No previous evaluations.");

        watcher.record(WatcherEvaluation::new(json!({}), "fine", vec![]));
        watcher.record(WatcherEvaluation::new(
            json!({}),
            "too hot",
            vec![r#"restart_node({"name":"camera"})"#.to_string()],
        ));
        let text = watcher.format_recent_history(1);
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with(r#"too hot | Actions: restart_node({"name":"camera"})"#));
    }

    #[test]
    fn test_spec_defaults_when_loading() {
        let spec: WatcherSpec = serde_json::from_value(json!({
            "name": "w",
            "topics": ["a"],
            "instruction": "watch"
        }))
        .unwrap();
        assert_eq!(spec.sample_interval_sec, 30);
        assert_eq!(spec.max_actions_per_hour, 10);
        assert!(!spec.paused);
    }

    #[test]
    fn test_describe() {
        let mut watcher = Watcher::new(spec());
        watcher.spec.paused = true;
        let text = watcher.describe();
        assert!(text.starts_with("### temp [PAUSED]"));
        assert!(text.contains("  Interval: 30s"));
        assert!(text.ends_with("  Actions this hour: 0/2"));
    }
}
