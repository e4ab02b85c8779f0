//! The turn orchestrator.
//!
//! Drives one turn end to end: transcription, the bounded tool loop, and
//! sentence-by-sentence synthesis. LLM token streaming overlaps with TTS of
//! already-completed sentences; audio still reaches the client in sentence
//! order (see [`super::sentence`]).
//!
//! History is transactional: messages are committed to the shared context
//! only at completed boundaries (accepted transcript, fully executed tool
//! batch, final assistant reply), so a cancelled turn never leaves a
//! dangling assistant-with-tool-calls entry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, AudioPlayable};
use crate::backend::{GenerateOptions, LlmEngine, SttEngine, TtsEngine};
use crate::config::{PipelineConfig, ToolCallFormat};
use crate::context::{ConversationContext, Message, ToolCall};
use crate::error::{PipelineError, Result};
use crate::normalize::normalize;
use crate::pipeline::messages::{TurnEvent, TurnEventSender};
use crate::pipeline::sentence::{OrderedSynthesis, SentenceSplitter};
use crate::tools::parser::{CallIdMinter, DualModeOutcome, DualModeParser, parse_prompt_injected};
use crate::tools::{Tool, ToolRegistry};

/// A conversation context shared between a session and its in-flight turn.
pub type SharedContext = Arc<Mutex<ConversationContext>>;

/// Completion report of a finished synthesis job.
type SynthesisReport = (usize, Option<AudioPlayable>);

/// Process-wide pipeline shared across sessions.
///
/// The only mutable state is the filler-phrase round-robin counter; all
/// per-turn state lives on the stack of the `process_*` call.
pub struct Pipeline {
    stt: Option<Arc<dyn SttEngine>>,
    llm: Arc<dyn LlmEngine>,
    tts: Option<Arc<dyn TtsEngine>>,
    tools: ToolRegistry,
    config: PipelineConfig,
    filler_index: AtomicUsize,
    minter: CallIdMinter,
}

impl Pipeline {
    /// Create a pipeline around an LLM engine.
    pub fn new(llm: Arc<dyn LlmEngine>, config: PipelineConfig) -> Self {
        let filler_index = AtomicUsize::new(config.filler_start_index);
        Self {
            stt: None,
            llm,
            tts: None,
            tools: ToolRegistry::new(),
            config,
            filler_index,
            minter: CallIdMinter::new(),
        }
    }

    /// Attach a speech-to-text engine.
    pub fn with_stt(mut self, stt: Arc<dyn SttEngine>) -> Self {
        self.stt = Some(stt);
        self
    }

    /// Attach a text-to-speech engine.
    pub fn with_tts(mut self, tts: Arc<dyn TtsEngine>) -> Self {
        self.tts = Some(tts);
        self
    }

    /// Register a tool.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    /// Whether an STT engine is configured.
    pub fn has_stt(&self) -> bool {
        self.stt.is_some()
    }

    /// Whether a TTS engine is configured.
    pub fn has_tts(&self) -> bool {
        self.tts.is_some()
    }

    /// The configured system prompt.
    pub fn system_prompt(&self) -> &str {
        &self.config.system_prompt
    }

    /// Create a fresh conversation context seeded with the system prompt.
    pub fn new_context(&self) -> SharedContext {
        Arc::new(Mutex::new(ConversationContext::new(
            &self.config.system_prompt,
        )))
    }

    /// Transcribe an utterance and run the turn.
    ///
    /// # Errors
    ///
    /// Fails with [`PipelineError::NoStt`] when no STT engine is
    /// configured, [`PipelineError::EmptyTranscript`] when transcription
    /// yields only whitespace, and propagates back-end failures.
    pub async fn process_audio(
        &self,
        frame: AudioFrame,
        ctx: &SharedContext,
        events: &TurnEventSender,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        let Some(stt) = &self.stt else {
            return Err(PipelineError::NoStt);
        };
        info!(
            samples = frame.samples.len(),
            duration_s = frame.duration_secs(),
            "transcribing utterance"
        );
        let transcript = tokio::select! {
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = stt.transcribe(&frame) => result?,
        };
        let transcript = transcript.trim().to_owned();
        if transcript.is_empty() {
            return Err(PipelineError::EmptyTranscript);
        }
        self.process_transcript(&transcript, ctx, events, cancel)
            .await
    }

    /// Run a turn from text the client transcribed locally.
    ///
    /// # Errors
    ///
    /// Fails with a protocol error on whitespace-only input and propagates
    /// back-end failures.
    pub async fn process_text(
        &self,
        text: &str,
        ctx: &SharedContext,
        events: &TurnEventSender,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        if text.trim().is_empty() {
            return Err(PipelineError::Protocol("empty text input".into()));
        }
        self.process_transcript(text.trim(), ctx, events, cancel)
            .await
    }

    /// Append the user message and run the tool loop.
    ///
    /// Returns the messages newly appended this turn, for callers that
    /// persist them.
    ///
    /// # Errors
    ///
    /// Propagates back-end failures and cancellation; in both cases the
    /// shared context is left at the last completed message boundary.
    pub async fn process_transcript(
        &self,
        text: &str,
        ctx: &SharedContext,
        events: &TurnEventSender,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        send_event(events, TurnEvent::Transcript(text.to_owned()))?;

        let user = Message::user(text);
        lock_context(ctx).append([user.clone()]);
        let mut appended = vec![user];

        self.run_tool_loop(ctx, &mut appended, events, cancel)
            .await?;

        send_event(events, TurnEvent::Complete)?;
        Ok(appended)
    }

    /// The bounded tool loop for one turn.
    async fn run_tool_loop(
        &self,
        ctx: &SharedContext,
        appended: &mut Vec<Message>,
        events: &TurnEventSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (synth_tx, mut synth_rx) = mpsc::unbounded_channel::<SynthesisReport>();
        let mut turn = TurnState {
            splitter: SentenceSplitter::new(),
            synthesis: OrderedSynthesis::new(),
            synth_tx,
        };

        let native = self.llm.supports_tools();
        let tools_registered = !self.tools.is_empty();
        let conversation_id = lock_context(ctx).conversation_id().to_owned();
        let mut completed = false;

        for iteration in 0..self.config.max_tool_iterations {
            let mut messages: Vec<Message> = lock_context(ctx).history().to_vec();
            if let Some(instructions) = self.tool_instructions()
                && let Some(system) = messages.first_mut()
            {
                system.content.push_str(&instructions);
            }

            let grammar = !native && self.config.tool_call_format == ToolCallFormat::Grammar;
            // Prompt-injected calls can only be detected on the whole
            // response, so the first iteration with tools runs buffered.
            let buffered =
                !native && !grammar && tools_registered && iteration == 0;
            let mut dual = if grammar {
                Some(DualModeParser::new())
            } else {
                None
            };

            let (token_tx, mut token_rx) = mpsc::unbounded_channel::<String>();
            let options = GenerateOptions {
                tools: if native {
                    self.tools.definitions().to_vec()
                } else {
                    Vec::new()
                },
                token_tx: (!buffered).then(|| token_tx.clone()),
                conversation_id: Some(conversation_id.clone()),
            };
            drop(token_tx);

            debug!(iteration, buffered, grammar, native, "calling LLM");
            let generation = self.llm.generate(&messages, options);
            tokio::pin!(generation);

            let result = loop {
                tokio::select! {
                    () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    result = &mut generation => break result?,
                    Some(token) = token_rx.recv() => {
                        self.handle_token(&token, &mut dual, &mut turn, events)?;
                    }
                    Some((index, playable)) = synth_rx.recv() => {
                        for ready in turn.synthesis.record(index, playable) {
                            send_event(events, TurnEvent::Audio(ready))?;
                        }
                    }
                }
            };
            // Tokens the engine sent just before returning are still queued.
            while let Ok(token) = token_rx.try_recv() {
                self.handle_token(&token, &mut dual, &mut turn, events)?;
            }

            let (content, mut tool_calls, streamed) = if native {
                (result.content.clone(), result.tool_calls, true)
            } else if let Some(parser) = dual.take() {
                match parser.finish(&self.minter) {
                    DualModeOutcome::Say { text } => (text, Vec::new(), true),
                    DualModeOutcome::ToolCalls(calls) => (String::new(), calls, true),
                    DualModeOutcome::Malformed { raw } => {
                        warn!("grammar output matched neither branch; treating as reply");
                        (raw, Vec::new(), false)
                    }
                }
            } else {
                match parse_prompt_injected(&result.content, &self.minter) {
                    Some(calls) => (String::new(), calls, true),
                    None => (result.content.clone(), Vec::new(), !buffered),
                }
            };

            for call in &mut tool_calls {
                if call.id.is_empty() {
                    call.id = self.minter.mint();
                }
            }

            if tool_calls.is_empty() {
                if !streamed {
                    self.emit_text(&content, &mut turn, events)?;
                }
                let assistant = Message::assistant(content);
                lock_context(ctx).append([assistant.clone()]);
                appended.push(assistant);
                completed = true;
                break;
            }

            // Keep the user hearing something while the tools run.
            if !self.config.filler_phrases.is_empty() {
                let next = self.filler_index.fetch_add(1, Ordering::Relaxed);
                let filler = self.config.filler_phrases[next % self.config.filler_phrases.len()].clone();
                self.emit_text(&filler, &mut turn, events)?;
            }

            info!(
                calls = tool_calls.len(),
                iteration, "executing requested tool calls"
            );
            let assistant_content = if native { result.content.clone() } else { String::new() };
            let mut batch = vec![Message::assistant_with_tool_calls(
                assistant_content,
                tool_calls.clone(),
            )];
            for call in &tool_calls {
                send_event(events, TurnEvent::ToolCall(call.clone()))?;
                let outcome = self.execute_tool(call, cancel).await?;
                send_event(
                    events,
                    TurnEvent::ToolResult {
                        tool_call_id: call.id.clone(),
                        result: outcome.clone(),
                    },
                )?;
                batch.push(Message::tool_result(call.id.clone(), outcome.to_string()));
            }
            // The batch commits as a unit once every call has resolved.
            lock_context(ctx).append(batch.iter().cloned());
            appended.extend(batch);
        }

        if !completed {
            warn!(
                max_iterations = self.config.max_tool_iterations,
                "tool loop hit its iteration bound without a final reply"
            );
        }

        if let Some((index, rest)) = turn.splitter.flush() {
            self.spawn_synthesis(index, rest, &mut turn);
        }
        self.drain_synthesis(&mut turn, &mut synth_rx, events, cancel)
            .await
    }

    /// Forward one streamed token: response chunk plus sentence splitting.
    fn handle_token(
        &self,
        token: &str,
        dual: &mut Option<DualModeParser>,
        turn: &mut TurnState,
        events: &TurnEventSender,
    ) -> Result<()> {
        match dual {
            Some(parser) => {
                if let Some(text) = parser.push(token) {
                    self.emit_text(&text, turn, events)?;
                }
            }
            None => self.emit_text(token, turn, events)?,
        }
        Ok(())
    }

    /// Emit a text fragment as a response chunk and feed the TTS fan-out.
    fn emit_text(&self, text: &str, turn: &mut TurnState, events: &TurnEventSender) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        send_event(events, TurnEvent::ResponseChunk(text.to_owned()))?;
        if self.tts.is_some() {
            let sentences = turn.splitter.push(text);
            for (index, sentence) in sentences {
                self.spawn_synthesis(index, sentence, turn);
            }
        }
        Ok(())
    }

    /// Launch one synthesis task concurrent with the ongoing generation.
    fn spawn_synthesis(&self, index: usize, sentence: String, turn: &mut TurnState) {
        let Some(tts) = &self.tts else { return };
        turn.synthesis.job_started();
        let normalized = normalize(&sentence);
        if normalized.is_empty() {
            // Nothing to speak; report immediately so the index chain
            // stays contiguous.
            let _ = turn.synth_tx.send((index, None));
            return;
        }
        let tts = Arc::clone(tts);
        let report = turn.synth_tx.clone();
        tokio::spawn(async move {
            let payload = match tts.synthesize(&normalized).await {
                Ok(playable) => Some(playable),
                Err(e) => {
                    warn!(index, "TTS synthesis failed: {e}");
                    None
                }
            };
            let _ = report.send((index, payload));
        });
    }

    /// Wait for outstanding synthesis jobs and emit their audio in order.
    async fn drain_synthesis(
        &self,
        turn: &mut TurnState,
        synth_rx: &mut mpsc::UnboundedReceiver<SynthesisReport>,
        events: &TurnEventSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while turn.synthesis.outstanding() > 0 {
            tokio::select! {
                // Cancellation abandons in-flight jobs; their reports die
                // with the channel.
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                report = synth_rx.recv() => {
                    let Some((index, playable)) = report else { break };
                    for ready in turn.synthesis.record(index, playable) {
                        send_event(events, TurnEvent::Audio(ready))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Execute one tool call; failures are absorbed into the result value.
    async fn execute_tool(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "unknown tool requested");
            return Ok(serde_json::json!({
                "error": format!("Unknown tool: {}", call.name)
            }));
        };
        tokio::select! {
            () = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = tool.execute(call.arguments.clone()) => Ok(match result {
                Ok(value) => value,
                Err(e) => {
                    warn!(tool = %call.name, "tool execution failed: {e}");
                    serde_json::json!({"error": e.to_string()})
                }
            }),
        }
    }

    /// System-message addendum for back-ends without native tools.
    fn tool_instructions(&self) -> Option<String> {
        if self.tools.is_empty() || self.llm.supports_tools() {
            return None;
        }
        let doc = self.tools.definitions_document();
        let text = match self.config.tool_call_format {
            ToolCallFormat::PromptInjected => format!(
                "\n\nYou can use tools. To call one, respond with exactly one JSON document \
                 {{\"tool_call\": {{\"name\": \"<tool>\", \"arguments\": {{...}}}}}} and nothing \
                 else. Otherwise answer normally.\nAvailable tools: {doc}"
            ),
            ToolCallFormat::Grammar => format!(
                "\n\nEvery response must start with exactly one of two prefixes: \
                 `SAY: <spoken reply>` to answer, or \
                 `TOOL: [{{\"name\": \"<tool>\", \"arguments\": {{...}}}}]` to call tools.\n\
                 Available tools: {doc}"
            ),
        };
        Some(text)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stt", &self.stt.is_some())
            .field("tts", &self.tts.is_some())
            .field("tools", &self.tools)
            .field("native_tools", &self.llm.supports_tools())
            .finish()
    }
}

/// Per-turn mutable state.
struct TurnState {
    splitter: SentenceSplitter,
    synthesis: OrderedSynthesis,
    synth_tx: mpsc::UnboundedSender<SynthesisReport>,
}

fn send_event(events: &TurnEventSender, event: TurnEvent) -> Result<()> {
    events
        .send(event)
        .map_err(|_| PipelineError::Channel("turn event receiver dropped".into()))
}

fn lock_context(ctx: &SharedContext) -> MutexGuard<'_, ConversationContext> {
    ctx.lock().unwrap_or_else(PoisonError::into_inner)
}
