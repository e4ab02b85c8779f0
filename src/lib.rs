//! Parlance: real-time voice-assistant orchestration.
//!
//! One turn flows through three stages: speech-to-text, a bounded LLM tool
//! loop, and text-to-speech. The orchestrator streams partial model output
//! sentence-by-sentence into concurrent synthesis jobs while preserving
//! playback order, speaks filler phrases while tools run, and serves each
//! client over a duplex JSON message channel with per-session capability
//! negotiation (clients may handle STT and/or TTS locally).
//!
//! # Architecture
//!
//! - **backend**: the [`backend::SttEngine`] / [`backend::LlmEngine`] /
//!   [`backend::TtsEngine`] contracts plus the OpenAI-compatible adapter
//! - **pipeline**: the per-turn orchestrator and the sentence splitter /
//!   TTS fan-out
//! - **session** / **wire**: per-connection state machine, frame protocol,
//!   stdio and WebSocket transports

pub mod audio;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod session;
pub mod tools;
pub mod wire;

pub use config::{OrchestratorConfig, PipelineConfig, ToolCallFormat};
pub use context::{ConversationContext, Message, Role, ToolCall};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, SharedContext, TurnEvent};
pub use session::{Capabilities, Session, SessionState};
