//! Events emitted while a turn is processed.

use tokio::sync::mpsc;

use crate::audio::AudioPlayable;
use crate::context::ToolCall;

/// An observable event produced during one turn.
///
/// Events for a turn arrive in a fixed order discipline: `ResponseChunk`s
/// in token order, `Audio` in sentence order, each `ToolCall` before its
/// `ToolResult`, and `Complete` last.
#[derive(Debug)]
pub enum TurnEvent {
    /// The user's transcribed (or typed) input.
    Transcript(String),
    /// A fragment of assistant text, in token order.
    ResponseChunk(String),
    /// Synthesized speech for one sentence, in sentence order.
    Audio(AudioPlayable),
    /// The assistant requested a tool call.
    ToolCall(ToolCall),
    /// A tool finished (result or serialized error).
    ToolResult {
        /// The call this result answers.
        tool_call_id: String,
        /// Tool output, or `{"error": ...}` on failure.
        result: serde_json::Value,
    },
    /// Terminal event of a successful turn.
    Complete,
}

/// Sender half of a turn's event stream.
pub type TurnEventSender = mpsc::UnboundedSender<TurnEvent>;

/// Receiver half of a turn's event stream.
pub type TurnEventReceiver = mpsc::UnboundedReceiver<TurnEvent>;
