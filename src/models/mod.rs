//! Model backend abstraction.
//!
//! The conversation loop talks to a [`ModelBackend`] and never to HTTP
//! directly, so tests can substitute a scripted backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod anthropic;

/// One entry in the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: MessageContent,
}

/// Message payload. `Blocks` carries provider content blocks (tool calls,
/// tool results, images) for the live turn; stored history is plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl MessageContent {
    /// Best-effort text view, used when compacting history.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t),
            MessageContent::Blocks(_) => None,
        }
    }
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn blocks(role: &str, blocks: Vec<Value>) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: MessageContent::Blocks(blocks),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back in the tool result.
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Outcome of one completion request.
#[derive(Debug)]
pub enum ModelTurn {
    /// The model produced a final textual answer.
    Final(String),
    /// The model wants tools run. `content` is the assistant turn's raw
    /// content blocks, appended verbatim to the transcript.
    ToolUse {
        content: Vec<Value>,
        calls: Vec<ToolCallRequest>,
    },
}

/// Owned request payload handed to a backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    /// Tool schemas, `{name, description, input_schema}` objects.
    pub tools: Vec<Value>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

/// A chat-completion provider.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ModelTurn>;
}
