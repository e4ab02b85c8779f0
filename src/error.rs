//! Error types for the voice-assistant pipeline.

/// Top-level error type for the orchestrator and its stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model generation error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio was submitted but no STT back-end is configured.
    #[error("no STT back-end configured")]
    NoStt,

    /// The STT back-end returned only whitespace.
    #[error("empty transcript")]
    EmptyTranscript,

    /// An opaque (non-buffered) TTS playable cannot be sent over the wire.
    #[error("opaque audio cannot be forwarded to a remote client")]
    OpaqueAudioToRemote,

    /// Malformed or ill-timed inbound frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session was cancelled (disconnect) while a turn was in flight.
    #[error("turn cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable machine-readable kind tag for wire `error` events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stt(_) | Self::Llm(_) | Self::Tts(_) => "backend_failure",
            Self::NoStt => "no_stt",
            Self::EmptyTranscript => "empty_transcript",
            Self::OpaqueAudioToRemote => "opaque_audio_to_remote",
            Self::Protocol(_) => "protocol_error",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config_error",
            Self::Channel(_) | Self::Io(_) => "internal_error",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stage_prefix() {
        let e = PipelineError::Stt("model not loaded".into());
        assert_eq!(e.to_string(), "STT error: model not loaded");
    }

    #[test]
    fn kind_maps_backend_errors_together() {
        assert_eq!(PipelineError::Stt(String::new()).kind(), "backend_failure");
        assert_eq!(PipelineError::Llm(String::new()).kind(), "backend_failure");
        assert_eq!(PipelineError::Tts(String::new()).kind(), "backend_failure");
    }

    #[test]
    fn kind_is_stable_for_protocol_errors() {
        let e = PipelineError::Protocol("bad frame".into());
        assert_eq!(e.kind(), "protocol_error");
    }
}
