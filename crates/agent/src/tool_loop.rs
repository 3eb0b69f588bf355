//! Bounded tool-calling loop
//!
//! Call the model, run any requested capabilities, feed the results back and
//! repeat until the model answers in plain text or the turn cap is hit. The
//! interactive agent and every watcher cycle run through here.

use nodewarden_provider::{log_response, ChatParams, Message, Provider, Tool, ToolCall};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::registry::{CapabilityKind, CapabilityRegistry};

/// Final text when the turn cap is reached
pub const MAX_TURNS_NOTICE: &str = "[Reached max reasoning turns. Please try a simpler request.]";

/// Final text when the model answers with nothing
pub const EMPTY_RESPONSE: &str = "(No response)";

const ACTION_WINDOW: Duration = Duration::from_secs(3600);

/// Rolling hourly action counter for one watcher
#[derive(Debug, Clone, Copy)]
pub struct ActionBudget {
    pub max_per_hour: u32,
    pub used: u32,
    pub window_start: Instant,
}

impl ActionBudget {
    pub fn new(max_per_hour: u32) -> Self {
        Self {
            max_per_hour,
            used: 0,
            window_start: Instant::now(),
        }
    }

    fn roll_window(&mut self) {
        if self.window_start.elapsed() >= ACTION_WINDOW {
            self.used = 0;
            self.window_start = Instant::now();
        }
    }

    /// True while actions remain in the current window
    pub fn can_act(&mut self) -> bool {
        self.roll_window();
        self.used < self.max_per_hour
    }

    /// Take one action slot if available
    pub fn try_consume(&mut self) -> bool {
        if !self.can_act() {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn remaining(&mut self) -> u32 {
        self.roll_window();
        self.max_per_hour.saturating_sub(self.used)
    }
}

/// Which capabilities the model is offered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Catalog {
    Full,
    Subset(Vec<String>),
    Withheld,
}

impl Catalog {
    fn allows(&self, name: &str) -> bool {
        match self {
            Catalog::Full => true,
            Catalog::Subset(names) => names.iter().any(|n| n == name),
            Catalog::Withheld => false,
        }
    }
}

/// How a loop run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Completed,
    MaxTurns,
    ProviderFailed,
}

/// Result of one loop run
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub text: String,
    pub status: LoopStatus,
    /// Executed invocations as `name(args-json)`
    pub actions: Vec<String>,
    /// Model calls made
    pub turns: u32,
}

/// Model + registry + limits
#[derive(Clone)]
pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    registry: Arc<CapabilityRegistry>,
    model: String,
    max_turns: u32,
    max_tokens: u32,
    temperature: f32,
}

impl ToolLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<CapabilityRegistry>,
        model: impl Into<String>,
        max_turns: u32,
    ) -> Self {
        Self {
            provider,
            registry,
            model: model.into(),
            max_turns,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    fn tools_for(&self, catalog: &Catalog) -> Vec<Tool> {
        match catalog {
            Catalog::Full => self.registry.catalog(),
            Catalog::Subset(names) => self.registry.catalog_subset(names),
            Catalog::Withheld => Vec::new(),
        }
    }

    /// Run until a text answer, the turn cap, or a backend failure
    ///
    /// With a budget, the catalog is withheld once the budget is spent and
    /// any further action request is refused without running it.
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        catalog: &Catalog,
        mut budget: Option<&mut ActionBudget>,
    ) -> LoopOutcome {
        let mut actions = Vec::new();

        for turn in 1..=self.max_turns {
            let exhausted = budget.as_deref_mut().map(|b| !b.can_act()).unwrap_or(false);
            let effective = if exhausted { &Catalog::Withheld } else { catalog };
            debug!("Loop turn {}/{} ({} messages)", turn, self.max_turns, messages.len());

            let params = ChatParams {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: self.tools_for(effective),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                ..ChatParams::default()
            };

            let response = match self.provider.chat(params).await {
                Ok(r) => r,
                Err(e) => {
                    error!("Model backend call failed: {}", e);
                    return LoopOutcome {
                        text: format!("Error: model backend failed - {e}"),
                        status: LoopStatus::ProviderFailed,
                        actions,
                        turns: turn,
                    };
                }
            };
            log_response(&response);

            if !response.has_tool_calls() {
                let text = response
                    .content
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_RESPONSE.to_string());
                return LoopOutcome {
                    text,
                    status: LoopStatus::Completed,
                    actions,
                    turns: turn,
                };
            }

            messages.push(response.assistant_message());
            for call in &response.tool_calls {
                let result = self
                    .execute_call(call, effective, budget.as_deref_mut(), &mut actions)
                    .await;
                messages.push(Message::tool(&call.id, &call.name, result));
            }
        }

        warn!("Reached max turns ({})", self.max_turns);
        LoopOutcome {
            text: MAX_TURNS_NOTICE.to_string(),
            status: LoopStatus::MaxTurns,
            actions,
            turns: self.max_turns,
        }
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
        catalog: &Catalog,
        budget: Option<&mut ActionBudget>,
        actions: &mut Vec<String>,
    ) -> String {
        if !catalog.allows(&call.name) {
            warn!("Model requested unavailable capability {}", call.name);
            return format!("Error: capability '{}' is not available here", call.name);
        }

        let is_action = self.registry.kind_of(&call.name) == Some(CapabilityKind::Action);
        if let (true, Some(budget)) = (is_action, budget) {
            // A slot is spent before running, so failed invocations count too.
            if !budget.try_consume() {
                info!("Action budget exhausted, refusing {}", call.name);
                return format!(
                    "Error: action budget exhausted; '{}' was not executed",
                    call.name
                );
            }
        }

        info!("Executing capability: {}({})", call.name, call.arguments);
        let result = self.registry.invoke(&call.name, call.arguments.clone()).await;
        actions.push(format_action(&call.name, &call.arguments));
        result
    }
}

fn format_action(name: &str, args: &Value) -> String {
    format!("{name}({args})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_action_budget_window_rolls() {
        let mut budget = ActionBudget::new(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.remaining(), 0);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(budget.can_act());
        assert_eq!(budget.remaining(), 2);
    }

    #[test]
    fn test_catalog_allows() {
        assert!(Catalog::Full.allows("anything"));
        assert!(Catalog::Subset(vec!["list_nodes".into()]).allows("list_nodes"));
        assert!(!Catalog::Subset(vec!["list_nodes".into()]).allows("stop_node"));
        assert!(!Catalog::Withheld.allows("list_nodes"));
    }

    #[test]
    fn test_format_action() {
        let args = serde_json::json!({"name": "camera"});
        assert_eq!(format_action("stop_node", &args), r#"stop_node({"name":"camera"})"#);
    }
}
