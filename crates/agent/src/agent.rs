//! Interactive agent - one exchange per user message

use std::sync::Arc;
use tracing::{debug, info, warn};

use nodewarden_session::{ConversationStore, DEFAULT_HISTORY};

use crate::context::ContextBuilder;
use crate::tool_loop::{Catalog, LoopStatus, ToolLoop};

/// Result of one interactive exchange
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub conversation_id: String,
    pub text: String,
    pub status: LoopStatus,
    pub actions: Vec<String>,
}

/// Chat front end over the tool loop with durable conversation logs
pub struct Agent {
    tool_loop: ToolLoop,
    context: Arc<ContextBuilder>,
    conversations: ConversationStore,
    history_messages: usize,
}

impl Agent {
    pub fn new(
        tool_loop: ToolLoop,
        context: Arc<ContextBuilder>,
        conversations: ConversationStore,
    ) -> Self {
        Self {
            tool_loop,
            context,
            conversations,
            history_messages: DEFAULT_HISTORY,
        }
    }

    /// Set the maximum number of history turns loaded per exchange
    pub fn set_history_messages(&mut self, max: usize) {
        self.history_messages = max;
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Handle one user message, creating a conversation when `conversation_id` is `None`
    pub async fn handle_message(&self, message: &str, conversation_id: Option<&str>) -> AgentReply {
        let id = conversation_id
            .map(str::to_string)
            .unwrap_or_else(ConversationStore::new_id);
        info!("Processing message for conversation {}", id);
        debug!("Content: {}", message.chars().take(100).collect::<String>());

        let history = match self.conversations.history(&id, self.history_messages).await {
            Ok(history) => history,
            Err(e) => {
                warn!("Failed to load conversation {}: {}", id, e);
                Vec::new()
            }
        };

        let messages = self.context.build_messages(history, message).await;
        let outcome = self.tool_loop.run(messages, &Catalog::Full, None).await;

        // provider failure text is stored as the assistant turn
        for (role, content) in [("user", message), ("assistant", outcome.text.as_str())] {
            if let Err(e) = self.conversations.append(&id, role, content).await {
                warn!("Failed to save conversation {}: {}", id, e);
            }
        }

        AgentReply {
            conversation_id: id,
            text: outcome.text,
            status: outcome.status,
            actions: outcome.actions,
        }
    }
}
