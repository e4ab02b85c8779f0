//! Conversation history types.
//!
//! A [`ConversationContext`] is an append-only sequence of role-tagged
//! [`Message`]s owned by one session. The first message is always `system`;
//! `tool` messages always follow an `assistant` message whose calls they
//! answer.

use serde::{Deserialize, Serialize};

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input (typed or transcribed).
    User,
    /// Assistant (model) output.
    Assistant,
    /// Tool execution result.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A structured tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Server-minted id, unique within a turn.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Call arguments as a JSON object.
    pub arguments: serde_json::Value,
}

/// A message in the conversation history.
///
/// Assistant messages may carry tool calls; tool messages carry the id of
/// the call they answer. Messages are immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,
    /// Text content. Empty for assistant turns that only emit tool calls.
    pub content: String,
    /// Tool calls made by the assistant (Assistant role only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The tool call this message answers (Tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message carrying tool calls and optional text.
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Append-only conversation history with a stable session identifier.
///
/// Owned by one session for its lifetime; never shared across sessions.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    conversation_id: String,
    history: Vec<Message>,
}

impl ConversationContext {
    /// Create a context seeded with the system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            history: vec![Message::system(system_prompt)],
        }
    }

    /// The stable conversation identifier.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// The full message history, system prompt first.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Number of messages, including the system prompt.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when only the system prompt is present.
    pub fn is_empty(&self) -> bool {
        self.history.len() <= 1
    }

    /// Append a batch of messages.
    ///
    /// Callers commit only completed work: a transcript, a fully executed
    /// tool batch, or a final assistant reply. This keeps the history free
    /// of dangling assistant-with-tool-calls entries under cancellation.
    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.history.extend(messages);
    }

    /// Reset the history to just the system prompt.
    ///
    /// The conversation id is preserved.
    pub fn clear(&mut self) {
        self.history.truncate(1);
    }
}
