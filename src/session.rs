//! Per-connection session state.
//!
//! A [`Session`] is created when a client connects and destroyed on
//! disconnect. It owns the capability record, the pending-audio buffer for
//! the current utterance, the conversation context and the cancellation
//! token scoping in-flight turns.
//!
//! State machine: `Idle -> Receiving -> Processing -> Idle`. Frames that
//! arrive while a turn is processing are rejected with a protocol error;
//! the in-flight turn is unaffected.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::audio::AudioFrame;
use crate::error::{PipelineError, Result};
use crate::pipeline::{Pipeline, SharedContext};

/// What the client handles locally. Defaults to nothing until the client
/// declares otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Client transcribes locally and sends `text` frames.
    pub has_stt: bool,
    /// Client synthesizes locally; the server emits no audio.
    pub has_tts: bool,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for input.
    Idle,
    /// Accumulating audio chunks for the current utterance.
    Receiving,
    /// A turn is in flight.
    Processing,
}

/// Per-connection state.
pub struct Session {
    pipeline: Arc<Pipeline>,
    capabilities: Capabilities,
    state: SessionState,
    pending_samples: Vec<f32>,
    pending_sample_rate: u32,
    context: SharedContext,
    cancel: CancellationToken,
    destroyed: bool,
}

impl Session {
    /// Create a session bound to the shared pipeline.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let context = pipeline.new_context();
        Self {
            pipeline,
            capabilities: Capabilities::default(),
            state: SessionState::Idle,
            pending_samples: Vec::new(),
            pending_sample_rate: 0,
            context,
            cancel: CancellationToken::new(),
            destroyed: false,
        }
    }

    /// The shared pipeline.
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The session's conversation context.
    pub fn context(&self) -> SharedContext {
        Arc::clone(&self.context)
    }

    /// The client capability record.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A child token scoping one turn. Destroying the session cancels it.
    pub fn turn_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Whether the session has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Store the client's capability declaration. Only legal while idle.
    ///
    /// # Errors
    ///
    /// Rejected with a protocol error outside `Idle`.
    pub fn set_capabilities(&mut self, capabilities: Capabilities) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(PipelineError::Protocol(
                "capabilities may only change while the session is idle".into(),
            ));
        }
        info!(
            has_stt = capabilities.has_stt,
            has_tts = capabilities.has_tts,
            "client capabilities set"
        );
        self.capabilities = capabilities;
        Ok(())
    }

    /// Append one chunk of user speech.
    ///
    /// # Errors
    ///
    /// Rejected with a protocol error while a turn is processing.
    pub fn push_audio(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        match self.state {
            SessionState::Processing => Err(busy()),
            SessionState::Idle | SessionState::Receiving => {
                self.state = SessionState::Receiving;
                self.pending_samples.extend_from_slice(samples);
                self.pending_sample_rate = sample_rate;
                Ok(())
            }
        }
    }

    /// Finalize the current utterance and move to `Processing`.
    ///
    /// # Errors
    ///
    /// Rejected while processing, and when no audio has been received.
    pub fn end_audio(&mut self) -> Result<AudioFrame> {
        match self.state {
            SessionState::Processing => Err(busy()),
            SessionState::Idle => Err(PipelineError::Protocol("no audio received".into())),
            SessionState::Receiving => {
                if self.pending_samples.is_empty() {
                    self.state = SessionState::Idle;
                    return Err(PipelineError::Protocol("no audio received".into()));
                }
                let samples = std::mem::take(&mut self.pending_samples);
                let frame = AudioFrame::new(samples, self.pending_sample_rate);
                self.state = SessionState::Processing;
                Ok(frame)
            }
        }
    }

    /// Accept a locally transcribed `text` frame and move to `Processing`.
    ///
    /// Any partial audio buffer is discarded.
    ///
    /// # Errors
    ///
    /// Rejected while a turn is processing.
    pub fn begin_text_turn(&mut self) -> Result<()> {
        if self.state == SessionState::Processing {
            return Err(busy());
        }
        self.pending_samples.clear();
        self.state = SessionState::Processing;
        Ok(())
    }

    /// Mark the in-flight turn as finished.
    pub fn finish_turn(&mut self) {
        if self.state == SessionState::Processing {
            self.state = SessionState::Idle;
        }
    }

    /// Reset the conversation to just the system prompt. Idle only.
    ///
    /// # Errors
    ///
    /// Rejected with a protocol error outside `Idle`.
    pub fn clear_history(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(busy());
        }
        self.context
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        Ok(())
    }

    /// Cancel any in-flight turn and release buffers.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.cancel.cancel();
        self.pending_samples = Vec::new();
        info!("session destroyed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn busy() -> PipelineError {
    PipelineError::Protocol("session is busy processing a turn".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerateOptions, GenerateResult, LlmEngine};
    use crate::config::PipelineConfig;
    use crate::context::Message;

    struct NullLlm;

    #[async_trait::async_trait]
    impl LlmEngine for NullLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _options: GenerateOptions,
        ) -> Result<GenerateResult> {
            Ok(GenerateResult::default())
        }
    }

    fn session() -> Session {
        let pipeline = Pipeline::new(Arc::new(NullLlm), PipelineConfig::default());
        Session::new(Arc::new(pipeline))
    }

    #[test]
    fn audio_accumulates_across_chunks() {
        let mut s = session();
        s.push_audio(&[0.1, 0.2], 16_000).expect("push in test");
        s.push_audio(&[0.3], 16_000).expect("push in test");
        assert_eq!(s.state(), SessionState::Receiving);
        let frame = s.end_audio().expect("end in test");
        assert_eq!(frame.samples, vec![0.1, 0.2, 0.3]);
        assert_eq!(frame.sample_rate, 16_000);
        assert_eq!(s.state(), SessionState::Processing);
    }

    #[test]
    fn end_audio_without_chunks_is_rejected() {
        let mut s = session();
        let err = s.end_audio().expect_err("must fail");
        assert!(err.to_string().contains("no audio received"));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn frames_during_processing_are_rejected() {
        let mut s = session();
        s.begin_text_turn().expect("begin in test");
        assert!(s.push_audio(&[0.1], 16_000).is_err());
        assert!(s.begin_text_turn().is_err());
        assert!(s.clear_history().is_err());
        assert!(s.set_capabilities(Capabilities::default()).is_err());
        s.finish_turn();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.clear_history().is_ok());
    }

    #[test]
    fn capabilities_default_to_server_side() {
        let s = session();
        assert!(!s.capabilities().has_stt);
        assert!(!s.capabilities().has_tts);
    }

    #[test]
    fn capabilities_stick_once_set() {
        let mut s = session();
        s.set_capabilities(Capabilities {
            has_stt: false,
            has_tts: true,
        })
        .expect("set in test");
        assert!(s.capabilities().has_tts);
    }

    #[test]
    fn text_turn_discards_partial_audio() {
        let mut s = session();
        s.push_audio(&[0.5; 10], 16_000).expect("push in test");
        s.begin_text_turn().expect("begin in test");
        s.finish_turn();
        let err = s.end_audio().expect_err("buffer must be gone");
        assert!(err.to_string().contains("no audio received"));
    }

    #[test]
    fn clear_history_resets_to_system_prompt() {
        let mut s = session();
        let ctx = s.context();
        ctx.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .append([Message::user("hi"), Message::assistant("hello")]);
        s.clear_history().expect("clear in test");
        let guard = ctx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(guard.history().len(), 1);
    }

    #[test]
    fn destroy_cancels_the_turn_token() {
        let mut s = session();
        let token = s.turn_token();
        assert!(!token.is_cancelled());
        s.destroy();
        assert!(token.is_cancelled());
        assert!(s.is_destroyed());
    }
}
