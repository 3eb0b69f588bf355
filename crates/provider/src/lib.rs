//! Model backend for NodeWarden
//!
//! Chat-completion types plus the `Provider` trait the reasoning loops call.
//! An empty tool list means the model is offered no capabilities at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use thiserror::Error;
use tracing::{debug, trace};

pub mod openai;

pub use openai::OpenAiCompatProvider;

/// Backend errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend rejected request: {0}")]
    Api(String),

    #[error("no api key configured")]
    NoApiKey,

    #[error("invalid response from backend")]
    InvalidResponse,

    #[error("rate limited by backend")]
    RateLimited,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Capability invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One model response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Response requesting capability calls
    pub fn with_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        }
    }

    /// Raw assistant turn to append before tool results
    pub fn assistant_message(&self) -> Message {
        let calls = self
            .tool_calls
            .iter()
            .map(|c| ToolCallDef::new(&c.id, &c.name, c.arguments.clone()))
            .collect::<Vec<_>>();
        let mut msg = Message::assistant(self.content.clone().unwrap_or_default());
        if !calls.is_empty() {
            msg.tool_calls = Some(calls);
        }
        msg
    }
}

/// Token accounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Conversation turn sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content.into())
    }

    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::with_role("tool", result.into())
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Tool call as echoed back in an assistant turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDef {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCallDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// Capability metadata offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One chat request
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tool_choice: ToolChoice,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
            tool_choice: ToolChoice::Auto,
        }
    }
}

impl ChatParams {
    /// Params for `model` with the given messages and tools
    pub fn new(model: impl Into<String>, messages: Vec<Message>, tools: Vec<Tool>) -> Self {
        let params = Self {
            model: model.into(),
            messages,
            tools,
            ..Self::default()
        };
        trace!(
            "Chat params: {} messages, {} tools",
            params.messages.len(),
            params.tools.len()
        );
        params
    }
}

/// Tool selection mode
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    Auto,
    Required(String),
    None,
}

/// Chat completion service
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}

/// Log a one-line summary of a response
pub fn log_response(response: &ChatResponse) {
    debug!(
        "◆ Model response: {} tool calls, finish={}",
        response.tool_calls.len(),
        response.finish_reason
    );
}
