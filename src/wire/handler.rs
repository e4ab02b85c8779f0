//! The per-connection session handler.
//!
//! Binds a [`Session`] to a duplex frame transport: inbound frames drive
//! the session state machine, turn events stream back out as frames. The
//! handler applies the capability skips — no `audio` frames for clients
//! that synthesize locally — and guards against opaque playables reaching
//! the wire.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audio::{AudioFrame, decode_samples, encode_samples};
use crate::context::Message;
use crate::error::{PipelineError, Result};
use crate::pipeline::messages::TurnEventReceiver;
use crate::pipeline::{Pipeline, TurnEvent};
use crate::session::{Capabilities, Session};
use crate::wire::protocol::{ClientFrame, ServerFrame, decode_client_frame, encode_server_frame};

/// A duplex, message-oriented byte channel carrying one JSON frame per
/// message.
#[async_trait::async_trait]
pub trait FrameTransport: Send {
    /// Receive the next inbound frame. `None` means the peer disconnected.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Send one outbound frame.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the peer is gone.
    async fn send(&mut self, frame: &str) -> Result<()>;
}

/// The input that starts a turn.
enum TurnInput {
    Audio(AudioFrame),
    Text(String),
}

/// Bookkeeping for the turn currently in flight.
struct ActiveTurn {
    events: TurnEventReceiver,
    handle: JoinHandle<Result<Vec<Message>>>,
    cancel: CancellationToken,
}

/// Run one session over the given transport until the peer disconnects.
///
/// # Errors
///
/// Returns a channel error when writing to the transport fails; everything
/// else is reported to the client as `error` frames with the session kept
/// open.
pub async fn run_session<T: FrameTransport>(pipeline: Arc<Pipeline>, mut transport: T) -> Result<()> {
    let mut session = Session::new(pipeline);
    let mut active: Option<ActiveTurn> = None;
    info!("session connected");

    loop {
        if let Some(turn) = active.as_mut() {
            let mut turn_done = false;
            tokio::select! {
                // Poll turn events first so a finished turn is observed
                // before the frame that follows its `complete`.
                biased;
                event = turn.events.recv() => match event {
                    // A cancelled turn already reported its fate; swallow
                    // whatever events were still queued.
                    Some(event) if !turn.cancel.is_cancelled() => {
                        forward_event(&mut transport, session.capabilities(), &turn.cancel, event)
                            .await?;
                    }
                    Some(_) => {}
                    None => turn_done = true,
                },
                inbound = transport.recv() => match inbound {
                    None => {
                        session.destroy();
                        return Ok(());
                    }
                    // Frames during processing are rejected; the turn is
                    // unaffected.
                    Some(_) => {
                        send_error(
                            &mut transport,
                            &PipelineError::Protocol("session is busy processing a turn".into()),
                        )
                        .await?;
                    }
                },
            }
            if turn_done
                && let Some(turn) = active.take()
            {
                finish_turn(&mut transport, &mut session, turn).await?;
            }
        } else {
            match transport.recv().await {
                None => {
                    session.destroy();
                    return Ok(());
                }
                Some(Err(e)) => send_error(&mut transport, &e).await?,
                Some(Ok(raw)) => match decode_client_frame(&raw) {
                    Err(e) => send_error(&mut transport, &e).await?,
                    Ok(frame) => {
                        handle_idle_frame(&mut transport, &mut session, &mut active, frame).await?;
                    }
                },
            }
        }
    }
}

/// Apply one inbound frame while no turn is running.
async fn handle_idle_frame<T: FrameTransport>(
    transport: &mut T,
    session: &mut Session,
    active: &mut Option<ActiveTurn>,
    frame: ClientFrame,
) -> Result<()> {
    let outcome = match frame {
        ClientFrame::Capabilities { has_stt, has_tts } => session
            .set_capabilities(Capabilities { has_stt, has_tts })
            .map(|()| None),
        ClientFrame::Audio { data, sample_rate } => decode_samples(&data)
            .and_then(|samples| session.push_audio(&samples, sample_rate))
            .map(|()| None),
        ClientFrame::EndAudio => {
            if session.capabilities().has_stt {
                Err(PipelineError::Protocol(
                    "client declared local STT; send text frames instead".into(),
                ))
            } else {
                session.end_audio().map(|frame| Some(TurnInput::Audio(frame)))
            }
        }
        ClientFrame::Text { text } => session
            .begin_text_turn()
            .map(|()| Some(TurnInput::Text(text))),
        ClientFrame::ClearHistory => session.clear_history().map(|()| None),
    };

    match outcome {
        Err(e) => send_error(transport, &e).await,
        Ok(None) => Ok(()),
        Ok(Some(input)) => {
            *active = Some(spawn_turn(session, input));
            Ok(())
        }
    }
}

/// Launch the turn task for the accepted input.
fn spawn_turn(session: &Session, input: TurnInput) -> ActiveTurn {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let pipeline = Arc::clone(session.pipeline());
    let ctx = session.context();
    let cancel = session.turn_token();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        match input {
            TurnInput::Audio(frame) => {
                pipeline
                    .process_audio(frame, &ctx, &events_tx, &task_cancel)
                    .await
            }
            TurnInput::Text(text) => {
                pipeline
                    .process_text(&text, &ctx, &events_tx, &task_cancel)
                    .await
            }
        }
    });
    ActiveTurn {
        events: events_rx,
        handle,
        cancel,
    }
}

/// Encode one turn event as a frame, applying the capability skips.
async fn forward_event<T: FrameTransport>(
    transport: &mut T,
    capabilities: Capabilities,
    turn_cancel: &CancellationToken,
    event: TurnEvent,
) -> Result<()> {
    let frame = match event {
        TurnEvent::Transcript(text) => ServerFrame::Transcript { text },
        TurnEvent::ResponseChunk(text) => ServerFrame::ResponseChunk { text },
        TurnEvent::Audio(playable) => {
            if capabilities.has_tts {
                return Ok(());
            }
            match playable.as_buffered() {
                Some(frame) => ServerFrame::Audio {
                    data: encode_samples(&frame.samples),
                    sample_rate: frame.sample_rate,
                },
                None => {
                    // Only a buffered-audio TTS can serve remote playback;
                    // this is a configuration bug, so end the turn.
                    warn!("opaque TTS playable cannot be forwarded; cancelling turn");
                    turn_cancel.cancel();
                    ServerFrame::Error {
                        message: PipelineError::OpaqueAudioToRemote.to_string(),
                    }
                }
            }
        }
        TurnEvent::ToolCall(call) => ServerFrame::ToolCall {
            tool_call_id: call.id,
            name: call.name,
            arguments: call.arguments,
        },
        TurnEvent::ToolResult {
            tool_call_id,
            result,
        } => ServerFrame::ToolResult {
            tool_call_id,
            result,
        },
        TurnEvent::Complete => ServerFrame::Complete,
    };
    transport.send(&encode_server_frame(&frame)?).await
}

/// Join the finished turn task and report its outcome.
async fn finish_turn<T: FrameTransport>(
    transport: &mut T,
    session: &mut Session,
    turn: ActiveTurn,
) -> Result<()> {
    let outcome = turn.handle.await;
    session.finish_turn();
    match outcome {
        // The pipeline already emitted Complete.
        Ok(Ok(_)) => Ok(()),
        // Cancelled turns have either already reported their reason
        // (opaque audio) or the peer is gone; stay quiet.
        Ok(Err(PipelineError::Cancelled)) => Ok(()),
        Ok(Err(e)) => {
            warn!("turn failed: {e}");
            send_error(transport, &e).await
        }
        Err(e) => {
            warn!("turn task panicked or was aborted: {e}");
            send_error(
                transport,
                &PipelineError::Channel("turn task failed".into()),
            )
            .await
        }
    }
}

async fn send_error<T: FrameTransport>(transport: &mut T, error: &PipelineError) -> Result<()> {
    let frame = ServerFrame::Error {
        message: error.to_string(),
    };
    transport.send(&encode_server_frame(&frame)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioPlayable, LocalPlayback};
    use crate::backend::{GenerateOptions, GenerateResult, LlmEngine, TtsEngine};
    use crate::config::PipelineConfig;

    /// In-memory transport backed by channels.
    struct ChannelTransport {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    }

    #[async_trait::async_trait]
    impl FrameTransport for ChannelTransport {
        async fn recv(&mut self) -> Option<Result<String>> {
            self.inbound.recv().await.map(Ok)
        }
        async fn send(&mut self, frame: &str) -> Result<()> {
            self.outbound
                .send(frame.to_owned())
                .map_err(|_| PipelineError::Channel("test receiver dropped".into()))
        }
    }

    /// An LLM that streams a fixed reply after a short delay.
    struct SlowEchoLlm;

    #[async_trait::async_trait]
    impl LlmEngine for SlowEchoLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            options: GenerateOptions,
        ) -> Result<GenerateResult> {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            if let Some(tx) = &options.token_tx {
                let _ = tx.send("Okay. ".to_owned());
            }
            Ok(GenerateResult {
                content: "Okay. ".into(),
                ..GenerateResult::default()
            })
        }
        fn supports_tools(&self) -> bool {
            true
        }
    }

    struct BufferedTts;

    #[async_trait::async_trait]
    impl TtsEngine for BufferedTts {
        async fn synthesize(&self, _text: &str) -> Result<AudioPlayable> {
            Ok(AudioPlayable::Buffered(AudioFrame::new(vec![0.5; 8], 22_050)))
        }
    }

    struct NeverPlayed;

    #[async_trait::async_trait]
    impl LocalPlayback for NeverPlayed {
        async fn play(&self) -> Result<()> {
            Ok(())
        }
    }

    struct OpaqueTts;

    #[async_trait::async_trait]
    impl TtsEngine for OpaqueTts {
        async fn synthesize(&self, _text: &str) -> Result<AudioPlayable> {
            Ok(AudioPlayable::Opaque(Box::new(NeverPlayed)))
        }
    }

    struct Harness {
        to_server: mpsc::UnboundedSender<String>,
        from_server: mpsc::UnboundedReceiver<String>,
        handle: JoinHandle<Result<()>>,
    }

    fn start(pipeline: Pipeline) -> Harness {
        let (to_server, inbound) = mpsc::unbounded_channel();
        let (outbound, from_server) = mpsc::unbounded_channel();
        let transport = ChannelTransport { inbound, outbound };
        let handle = tokio::spawn(run_session(Arc::new(pipeline), transport));
        Harness {
            to_server,
            from_server,
            handle,
        }
    }

    impl Harness {
        fn send(&self, frame: serde_json::Value) {
            self.to_server
                .send(frame.to_string())
                .expect("send in test");
        }

        /// Collect frame types until `complete` or `error` arrives.
        async fn collect_turn(&mut self) -> Vec<serde_json::Value> {
            let mut frames = Vec::new();
            while let Some(raw) = self.from_server.recv().await {
                let frame: serde_json::Value =
                    serde_json::from_str(&raw).expect("frame json in test");
                let kind = frame["type"].as_str().unwrap_or_default().to_owned();
                frames.push(frame);
                if kind == "complete" || kind == "error" {
                    break;
                }
            }
            frames
        }

        async fn shutdown(mut self) {
            drop(self.to_server);
            self.from_server.close();
            let _ = self.handle.await;
        }
    }

    fn types(frames: &[serde_json::Value]) -> Vec<&str> {
        frames
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn text_turn_round_trip_with_server_tts() {
        let pipeline = Pipeline::new(Arc::new(SlowEchoLlm), PipelineConfig::default())
            .with_tts(Arc::new(BufferedTts));
        let mut harness = start(pipeline);

        harness.send(serde_json::json!({"type": "capabilities", "hasSTT": false, "hasTTS": false}));
        harness.send(serde_json::json!({"type": "text", "text": "hello"}));

        let frames = harness.collect_turn().await;
        assert_eq!(
            types(&frames),
            vec!["transcript", "response_chunk", "audio", "complete"]
        );
        assert_eq!(frames[0]["text"], "hello");
        assert_eq!(frames[2]["sampleRate"], 22_050);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn client_tts_suppresses_audio_frames() {
        let pipeline = Pipeline::new(Arc::new(SlowEchoLlm), PipelineConfig::default())
            .with_tts(Arc::new(BufferedTts));
        let mut harness = start(pipeline);

        harness.send(serde_json::json!({"type": "capabilities", "hasSTT": false, "hasTTS": true}));
        harness.send(serde_json::json!({"type": "text", "text": "hello"}));

        let frames = harness.collect_turn().await;
        assert_eq!(types(&frames), vec!["transcript", "response_chunk", "complete"]);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn frames_during_processing_are_rejected_with_an_error() {
        let pipeline = Pipeline::new(Arc::new(SlowEchoLlm), PipelineConfig::default());
        let mut harness = start(pipeline);

        harness.send(serde_json::json!({"type": "text", "text": "first"}));
        harness.send(serde_json::json!({"type": "text", "text": "second"}));

        // The busy rejection arrives before the first turn's remaining
        // frames because the second frame lands mid-generation.
        let frames = harness.collect_turn().await;
        assert!(types(&frames).contains(&"error"));
        let error = frames
            .iter()
            .find(|f| f["type"] == "error")
            .expect("error frame in test");
        assert!(
            error["message"]
                .as_str()
                .unwrap_or_default()
                .contains("busy")
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn end_audio_without_chunks_reports_no_audio() {
        let pipeline = Pipeline::new(Arc::new(SlowEchoLlm), PipelineConfig::default());
        let mut harness = start(pipeline);

        harness.send(serde_json::json!({"type": "end_audio"}));
        let frames = harness.collect_turn().await;
        assert_eq!(types(&frames), vec!["error"]);
        assert!(
            frames[0]["message"]
                .as_str()
                .unwrap_or_default()
                .contains("no audio received")
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn opaque_playable_to_a_remote_client_ends_the_turn_with_an_error() {
        let pipeline = Pipeline::new(Arc::new(SlowEchoLlm), PipelineConfig::default())
            .with_tts(Arc::new(OpaqueTts));
        let mut harness = start(pipeline);

        harness.send(serde_json::json!({"type": "text", "text": "hello"}));
        let frames = harness.collect_turn().await;
        let kinds = types(&frames);
        assert!(kinds.contains(&"error"));
        assert!(!kinds.contains(&"complete"));
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frames_keep_the_session_open() {
        let pipeline = Pipeline::new(Arc::new(SlowEchoLlm), PipelineConfig::default());
        let mut harness = start(pipeline);

        harness.send(serde_json::json!({"type": "warp_drive"}));
        let frames = harness.collect_turn().await;
        assert_eq!(types(&frames), vec!["error"]);

        // Still alive: a real turn works afterwards.
        harness.send(serde_json::json!({"type": "text", "text": "hello"}));
        let frames = harness.collect_turn().await;
        assert!(types(&frames).contains(&"complete"));
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn audio_before_capabilities_is_accepted_under_defaults() {
        // Documented choice: early audio is buffered under the default
        // capability record rather than rejected.
        let pipeline = Pipeline::new(Arc::new(SlowEchoLlm), PipelineConfig::default());
        let mut harness = start(pipeline);

        harness.send(serde_json::json!({
            "type": "audio",
            "data": encode_samples(&[0.1_f32; 160]),
            "sampleRate": 16_000
        }));
        harness.send(serde_json::json!({"type": "capabilities", "hasSTT": false, "hasTTS": false}));

        // Capabilities after audio is a state error (session is Receiving).
        let frames = harness.collect_turn().await;
        assert_eq!(types(&frames), vec!["error"]);
        harness.shutdown().await;
    }
}
