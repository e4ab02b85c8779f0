//! Back-end engine contracts.
//!
//! The orchestrator consumes three small async traits: [`SttEngine`],
//! [`LlmEngine`] and [`TtsEngine`]. Concrete engines may run local models,
//! spawn native binaries or call remote APIs; they must either be safe for
//! concurrent calls from different sessions or serialize internally.

pub mod openai;
pub mod sse;

use tokio::sync::mpsc;

use crate::audio::{AudioFrame, AudioPlayable};
use crate::context::{Message, ToolCall};
use crate::error::Result;
use crate::tools::ToolDefinition;

/// Progress reporting hook for engine initialization (model downloads,
/// warm-up).
pub type ProgressFn = Box<dyn Fn(&str) + Send + Sync>;

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    /// The model produced a final reply.
    #[default]
    Stop,
    /// The model requested tool calls.
    ToolCalls,
}

/// The outcome of one LLM generation.
#[derive(Debug, Default)]
pub struct GenerateResult {
    /// Full text content (also streamed via the token channel, when one
    /// was supplied).
    pub content: String,
    /// Structured tool calls, for back-ends with native tool support.
    pub tool_calls: Vec<ToolCall>,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
}

/// Options for one LLM generation.
#[derive(Default)]
pub struct GenerateOptions {
    /// Tool definitions. Ignored by back-ends without native tool support;
    /// the orchestrator injects tool instructions into the system message
    /// instead.
    pub tools: Vec<ToolDefinition>,
    /// When set, the engine sends each emitted text token. Tool-call
    /// portions of the output are never sent as tokens.
    pub token_tx: Option<mpsc::UnboundedSender<String>>,
    /// Stable conversation identifier, for engines that key internal state
    /// per conversation.
    pub conversation_id: Option<String>,
}

impl std::fmt::Debug for GenerateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateOptions")
            .field("tools", &self.tools.len())
            .field("streaming", &self.token_tx.is_some())
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}

/// Speech-to-text engine contract.
#[async_trait::async_trait]
pub trait SttEngine: Send + Sync {
    /// Prepare the engine (download/load models). Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot become ready.
    async fn initialize(&self, _progress: Option<ProgressFn>) -> Result<()> {
        Ok(())
    }

    /// Transcribe 16 kHz mono samples to text.
    ///
    /// The result is trimmed of surrounding whitespace. Empty input yields
    /// an empty string, not an error.
    ///
    /// # Errors
    ///
    /// Returns an STT error if transcription fails.
    async fn transcribe(&self, frame: &AudioFrame) -> Result<String>;

    /// Whether the engine is ready to transcribe.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Language-model engine contract.
#[async_trait::async_trait]
pub trait LlmEngine: Send + Sync {
    /// Prepare the engine. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot become ready.
    async fn initialize(&self, _progress: Option<ProgressFn>) -> Result<()> {
        Ok(())
    }

    /// Generate a reply to the conversation so far.
    ///
    /// # Errors
    ///
    /// Returns an LLM error if generation fails.
    async fn generate(&self, messages: &[Message], options: GenerateOptions)
    -> Result<GenerateResult>;

    /// Whether the engine is ready to generate.
    fn is_ready(&self) -> bool {
        true
    }

    /// Whether the engine accepts a tools list and returns structured
    /// [`ToolCall`]s natively.
    fn supports_tools(&self) -> bool {
        false
    }
}

/// Text-to-speech engine contract.
#[async_trait::async_trait]
pub trait TtsEngine: Send + Sync {
    /// Prepare the engine. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot become ready.
    async fn initialize(&self, _progress: Option<ProgressFn>) -> Result<()> {
        Ok(())
    }

    /// Synthesize normalized text to audio.
    ///
    /// Buffered playables are preferred; they are required when the server
    /// forwards audio over the wire.
    ///
    /// # Errors
    ///
    /// Returns a TTS error if synthesis fails.
    async fn synthesize(&self, text: &str) -> Result<AudioPlayable>;

    /// Whether the engine is ready to synthesize.
    fn is_ready(&self) -> bool {
        true
    }
}
