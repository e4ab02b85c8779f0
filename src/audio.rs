//! Audio sample types and the wire PCM codec.
//!
//! Audio crosses the wire as base64-encoded little-endian `f32` mono PCM.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{PipelineError, Result};

/// A chunk of mono audio samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// f32 samples in \[-1, 1\].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from samples at the given rate.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of the frame in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Synthesized speech ready for playback.
///
/// Buffered playables carry raw PCM and can be forwarded over the wire.
/// Opaque playables synthesize at playback time on the local device and
/// must never be serialized.
pub enum AudioPlayable {
    /// Raw mono samples at a known rate.
    Buffered(AudioFrame),
    /// Playback-side synthesis (e.g. a platform speech API).
    Opaque(Box<dyn LocalPlayback>),
}

impl AudioPlayable {
    /// The buffered frame, if this playable carries one.
    pub fn as_buffered(&self) -> Option<&AudioFrame> {
        match self {
            Self::Buffered(frame) => Some(frame),
            Self::Opaque(_) => None,
        }
    }
}

impl std::fmt::Debug for AudioPlayable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(frame) => f
                .debug_struct("Buffered")
                .field("samples", &frame.samples.len())
                .field("sample_rate", &frame.sample_rate)
                .finish(),
            Self::Opaque(_) => f.debug_struct("Opaque").finish_non_exhaustive(),
        }
    }
}

/// Playback hook for opaque TTS output.
#[async_trait::async_trait]
pub trait LocalPlayback: Send + Sync {
    /// Play the synthesized speech on the local device.
    async fn play(&self) -> Result<()>;
}

/// Encode f32 mono samples as base64 little-endian PCM.
#[must_use]
pub fn encode_samples(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode base64 little-endian PCM into f32 mono samples.
///
/// # Errors
///
/// Returns a protocol error if the payload is not valid base64 or its
/// length is not a multiple of four bytes.
pub fn decode_samples(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| PipelineError::Protocol(format!("invalid base64 audio payload: {e}")))?;
    if bytes.len() % 4 != 0 {
        return Err(PipelineError::Protocol(format!(
            "audio payload length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
