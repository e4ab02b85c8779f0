//! OpenAI-compatible chat-completions engine.
//!
//! Talks to `/v1/chat/completions` with `stream: true`, forwards text
//! deltas to the orchestrator's token channel and accumulates native
//! tool-call deltas into structured [`ToolCall`]s. Works against any
//! OpenAI-compatible host via `base_url`.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use tracing::{debug, warn};

use super::sse::{SseEvent, SseLineParser};
use super::{FinishReason, GenerateOptions, GenerateResult, LlmEngine};
use crate::config::OpenAiConfig;
use crate::context::{Message, Role, ToolCall};
use crate::error::{PipelineError, Result};

/// OpenAI-compatible LLM engine.
pub struct OpenAiLlm {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiLlm")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl OpenAiLlm {
    /// Create an engine from configuration.
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Build the chat-completions request body.
    fn build_request_body(&self, messages: &[Message], options: &GenerateOptions) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages_to_wire(messages),
            "stream": true,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
        });
        if !options.tools.is_empty()
            && let Some(obj) = body.as_object_mut()
        {
            let tools: Vec<serde_json::Value> = options
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            obj.insert("tools".into(), serde_json::json!(tools));
        }
        body
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> PipelineError {
        let message = extract_error_message(body);
        match status.as_u16() {
            401 => PipelineError::Llm(format!("authentication failed: {message}")),
            429 => PipelineError::Llm(format!("rate limited: {message}")),
            code => PipelineError::Llm(format!("HTTP {code}: {message}")),
        }
    }
}

/// Convert history messages to the chat-completions wire shape.
fn messages_to_wire(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::Tool => serde_json::json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.as_deref().unwrap_or_default(),
                "content": msg.content,
            }),
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let calls: Vec<serde_json::Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": msg.content,
                    "tool_calls": calls,
                })
            }
            role => serde_json::json!({
                "role": role.to_string(),
                "content": msg.content,
            }),
        })
        .collect()
}

/// Pull a human-readable message out of an error response body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

/// Accumulates streamed tool-call deltas keyed by their index.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u64, PendingCall>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn push_delta(&mut self, index: u64, id: Option<&str>, name: Option<&str>, args: Option<&str>) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id
            && !id.is_empty()
        {
            call.id = id.to_owned();
        }
        if let Some(name) = name
            && !name.is_empty()
        {
            call.name = name.to_owned();
        }
        if let Some(args) = args {
            call.arguments.push_str(args);
        }
    }

    fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finish accumulation, parsing each call's argument buffer.
    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|call| {
                let arguments = if call.arguments.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                        warn!("unparseable tool-call arguments for {}: {e}", call.name);
                        serde_json::json!({})
                    })
                };
                ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments,
                }
            })
            .collect()
    }
}

/// Running state while consuming the SSE stream.
#[derive(Default)]
struct StreamState {
    content: String,
    accumulator: ToolCallAccumulator,
    finish_reason: Option<FinishReason>,
}

fn handle_sse_event(event: &SseEvent, state: &mut StreamState, options: &GenerateOptions) {
    if event.is_done() {
        return;
    }
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&event.data) else {
        debug!("skipping unparseable SSE chunk");
        return;
    };
    let Some(choices) = parsed.get("choices").and_then(|c| c.as_array()) else {
        return;
    };
    for choice in choices {
        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(|c| c.as_str())
                && !content.is_empty()
            {
                state.content.push_str(content);
                if let Some(tx) = &options.token_tx {
                    let _ = tx.send(content.to_owned());
                }
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
                for tc in tool_calls {
                    let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                    let id = tc.get("id").and_then(|i| i.as_str());
                    let function = tc.get("function");
                    let name = function.and_then(|f| f.get("name")).and_then(|n| n.as_str());
                    let args = function
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str());
                    state.accumulator.push_delta(index, id, name, args);
                }
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            state.finish_reason = Some(match reason {
                "tool_calls" => FinishReason::ToolCalls,
                _ => FinishReason::Stop,
            });
        }
    }
}

#[async_trait::async_trait]
impl LlmEngine for OpenAiLlm {
    async fn generate(
        &self,
        messages: &[Message],
        options: GenerateOptions,
    ) -> Result<GenerateResult> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let body = self.build_request_body(messages, &options);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }

        let mut state = StreamState::default();
        let mut parser = SseLineParser::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| PipelineError::Llm(format!("stream error: {e}")))?;
            for event in parser.push(&chunk) {
                handle_sse_event(&event, &mut state, &options);
            }
        }
        if let Some(event) = parser.flush() {
            handle_sse_event(&event, &mut state, &options);
        }

        let tool_calls = if state.accumulator.is_empty() {
            Vec::new()
        } else {
            state.accumulator.finish()
        };
        let finish_reason = state.finish_reason.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });

        Ok(GenerateResult {
            content: state.content,
            tool_calls,
            finish_reason,
        })
    }

    fn is_ready(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn supports_tools(&self) -> bool {
        true
    }
}
