//! Wire frame types.
//!
//! One UTF-8 JSON object per frame, tagged by `type`. Canonical field
//! names are camelCase (`hasSTT`, `sampleRate`, `toolCallId`); snake_case
//! synonyms observed in older clients are accepted on the way in and never
//! emitted.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Capability declaration; expected as the first frame.
    Capabilities {
        /// Client transcribes locally.
        #[serde(rename = "hasSTT", alias = "has_stt", default)]
        has_stt: bool,
        /// Client synthesizes locally.
        #[serde(rename = "hasTTS", alias = "has_tts", default)]
        has_tts: bool,
    },
    /// One chunk of user speech, base64 float32 little-endian mono PCM.
    Audio {
        /// Encoded samples.
        data: String,
        /// Sample rate in Hz.
        #[serde(rename = "sampleRate", alias = "sample_rate")]
        sample_rate: u32,
    },
    /// Finalize the current utterance and process it.
    EndAudio,
    /// Client already transcribed; run the turn from text.
    Text {
        /// The transcribed input.
        text: String,
    },
    /// Reset the conversation to the system prompt.
    ClearHistory,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The recognized user input.
    Transcript {
        /// Transcribed text.
        text: String,
    },
    /// A fragment of assistant text, in token order.
    ResponseChunk {
        /// Fragment text.
        text: String,
    },
    /// Synthesized speech for one sentence, in sentence order.
    Audio {
        /// Base64 float32 little-endian mono PCM.
        data: String,
        /// Sample rate in Hz.
        #[serde(rename = "sampleRate", alias = "sample_rate")]
        sample_rate: u32,
    },
    /// The assistant requested a tool call.
    ToolCall {
        /// Server-minted call id.
        #[serde(rename = "toolCallId", alias = "tool_call_id")]
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Call arguments.
        arguments: serde_json::Value,
    },
    /// A tool finished.
    ToolResult {
        /// The call this result answers.
        #[serde(rename = "toolCallId", alias = "tool_call_id")]
        tool_call_id: String,
        /// Tool output, or `{"error": ...}` on failure.
        result: serde_json::Value,
    },
    /// Terminal event of a turn.
    Complete,
    /// Something went wrong; the session stays open.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Decode one inbound frame.
///
/// # Errors
///
/// Malformed frames are protocol errors; the session stays open.
pub fn decode_client_frame(raw: &str) -> Result<ClientFrame> {
    serde_json::from_str(raw)
        .map_err(|e| PipelineError::Protocol(format!("malformed frame: {e}")))
}

/// Encode one outbound frame.
///
/// # Errors
///
/// Serialization failures surface as channel errors.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String> {
    serde_json::to_string(frame)
        .map_err(|e| PipelineError::Channel(format!("failed to encode frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_tags_are_snake_case() {
        let frame = decode_client_frame(r#"{"type": "end_audio"}"#).expect("decode in test");
        assert_eq!(frame, ClientFrame::EndAudio);
        let frame = decode_client_frame(r#"{"type": "clear_history"}"#).expect("decode in test");
        assert_eq!(frame, ClientFrame::ClearHistory);
    }

    #[test]
    fn capabilities_use_camel_case_canonically() {
        let frame = decode_client_frame(r#"{"type": "capabilities", "hasSTT": true, "hasTTS": false}"#)
            .expect("decode in test");
        assert_eq!(
            frame,
            ClientFrame::Capabilities {
                has_stt: true,
                has_tts: false
            }
        );
    }

    #[test]
    fn snake_case_synonyms_are_accepted_inbound() {
        let frame = decode_client_frame(
            r#"{"type": "audio", "data": "AAAA", "sample_rate": 16000}"#,
        )
        .expect("decode in test");
        assert_eq!(
            frame,
            ClientFrame::Audio {
                data: "AAAA".into(),
                sample_rate: 16_000
            }
        );
    }

    #[test]
    fn missing_capability_fields_default_to_false() {
        let frame = decode_client_frame(r#"{"type": "capabilities"}"#).expect("decode in test");
        assert_eq!(
            frame,
            ClientFrame::Capabilities {
                has_stt: false,
                has_tts: false
            }
        );
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let err = decode_client_frame("{nope").expect_err("must fail");
        assert_eq!(err.kind(), "protocol_error");
        let err = decode_client_frame(r#"{"type": "warp"}"#).expect_err("must fail");
        assert_eq!(err.kind(), "protocol_error");
    }

    #[test]
    fn server_frames_emit_canonical_camel_case() {
        let frame = ServerFrame::Audio {
            data: "AAAA".into(),
            sample_rate: 22_050,
        };
        let json = encode_server_frame(&frame).expect("encode in test");
        assert!(json.contains("\"sampleRate\":22050"));
        assert!(!json.contains("sample_rate"));

        let frame = ServerFrame::ToolCall {
            tool_call_id: "call_0_ab".into(),
            name: "roll_dice".into(),
            arguments: serde_json::json!({"notation": "2d6"}),
        };
        let json = encode_server_frame(&frame).expect("encode in test");
        assert!(json.contains("\"type\":\"tool_call\""));
        assert!(json.contains("\"toolCallId\":\"call_0_ab\""));
    }

    #[test]
    fn server_frame_round_trip() {
        let frames = [
            ServerFrame::Transcript { text: "hi".into() },
            ServerFrame::ResponseChunk { text: "a ".into() },
            ServerFrame::Complete,
            ServerFrame::Error {
                message: "boom".into(),
            },
        ];
        for frame in frames {
            let json = encode_server_frame(&frame).expect("encode in test");
            let parsed: ServerFrame = serde_json::from_str(&json).expect("decode in test");
            assert_eq!(parsed, frame);
        }
    }
}
