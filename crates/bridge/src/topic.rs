//! Topic naming grammar and scoping

use regex::Regex;
use std::sync::OnceLock;

/// Root chunk of every key this agent produces
pub const TOPIC_ROOT: &str = "nodewarden";

fn topic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9/_\-\.]+$").expect("static topic pattern"))
}

fn pattern_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9/_\-\.\*]+$").expect("static pattern pattern"))
}

/// Concrete topic names: letters, digits and `/ _ - .`
pub fn is_valid_topic(topic: &str) -> bool {
    topic_regex().is_match(topic)
}

/// Wildcard patterns additionally allow `*`
pub fn is_valid_pattern(pattern: &str) -> bool {
    pattern_regex().is_match(pattern)
}

/// Scope/machine pair used to build fully-qualified keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScope {
    pub scope: String,
    pub machine_id: String,
}

impl TopicScope {
    pub fn new(scope: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            machine_id: machine_id.into(),
        }
    }

    /// `nodewarden/{scope}/{machine}/{suffix}`
    pub fn topic(&self, suffix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            TOPIC_ROOT,
            self.scope,
            self.machine_id,
            suffix.trim_start_matches('/')
        )
    }

    /// `nodewarden/{machine}/daemon/api/{endpoint}`
    pub fn daemon_key(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/daemon/api/{}",
            TOPIC_ROOT,
            self.machine_id,
            endpoint.trim_start_matches('/')
        )
    }

    /// `nodewarden/{scope}/{machine}/health/{node}`
    pub fn health_key(&self, node: &str) -> String {
        self.topic(&format!("health/{node}"))
    }

    /// Qualify a caller-supplied topic unless it is already rooted
    pub fn qualify(&self, topic: &str) -> String {
        if topic.starts_with(&format!("{TOPIC_ROOT}/")) {
            topic.to_string()
        } else {
            self.topic(topic)
        }
    }
}
