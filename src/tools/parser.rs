//! Parsing of tool calls out of LLM output.
//!
//! Three conventions exist; the orchestrator picks exactly one per turn
//! based on the back-end's advertised capability and the configured format:
//!
//! - **Native**: the back-end returns structured calls; nothing to parse.
//! - **Prompt-injected**: the whole response is expected to be a JSON
//!   document `{"tool_call": {"name": ..., "arguments": {...}}}`. See
//!   [`parse_prompt_injected`].
//! - **Grammar-constrained**: the response starts with either `SAY:` (free
//!   text, streamed verbatim) or `TOOL:` (a buffered JSON array of calls).
//!   See [`DualModeParser`].
//!
//! Every parsed call gets a fresh server-side id from [`CallIdMinter`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::ToolCall;

/// Mints tool-call ids: a monotonic sequence number plus an entropy suffix.
#[derive(Debug, Default)]
pub struct CallIdMinter {
    counter: AtomicU64,
}

impl CallIdMinter {
    /// Create a minter starting at sequence zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh id of the form `call_<seq>_<8 hex chars>`.
    pub fn mint(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let entropy = uuid::Uuid::new_v4().simple().to_string();
        format!("call_{seq}_{}", &entropy[..8])
    }
}

/// The `"tool_call"` marker that distinguishes an injected call from prose.
const TOOL_CALL_MARKER: &str = "\"tool_call\"";

/// Extract a prompt-injected tool call from a buffered response.
///
/// Detection: the trimmed content starts with `{` and contains the literal
/// `"tool_call"`. When the whole document does not parse, a balanced-brace
/// scan looks for an embedded `{...}` object containing the marker (models
/// sometimes wrap the call in prose). Returns `None` when the content is an
/// ordinary reply.
pub fn parse_prompt_injected(content: &str, minter: &CallIdMinter) -> Option<Vec<ToolCall>> {
    if !content.contains(TOOL_CALL_MARKER) {
        return None;
    }

    let trimmed = content.trim();
    if trimmed.starts_with('{')
        && let Some(calls) = parse_tool_call_document(trimmed, minter)
    {
        return Some(calls);
    }

    // Fallback: scan for a balanced object embedded in surrounding text.
    for candidate in balanced_objects(content) {
        if candidate.contains(TOOL_CALL_MARKER)
            && let Some(calls) = parse_tool_call_document(candidate, minter)
        {
            return Some(calls);
        }
    }

    None
}

/// Parse one `{"tool_call": {...}}` document into a single minted call.
fn parse_tool_call_document(text: &str, minter: &CallIdMinter) -> Option<Vec<ToolCall>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let call = value.get("tool_call")?;
    let name = call.get("name")?.as_str()?.to_owned();
    let arguments = call
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some(vec![ToolCall {
        id: minter.mint(),
        name,
        arguments,
    }])
}

/// Yield every balanced `{...}` substring, string-literal aware.
///
/// Balanced braces are beyond a regular expression, so this is a small
/// depth-counting scan.
fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0
                        && let Some(s) = start.take()
                    {
                        spans.push((s, i + 1));
                    }
                }
            }
            _ => {}
        }
    }

    spans.into_iter().map(move |(s, e)| &text[s..e])
}

// ── Grammar-constrained dual mode ─────────────────────────────

/// Prefix that introduces free text.
const SAY_PREFIX: &str = "SAY:";
/// Prefix that introduces a buffered tool-call array.
const TOOL_PREFIX: &str = "TOOL:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DualState {
    /// Not enough bytes yet to tell `SAY:` from `TOOL:`.
    Detecting,
    /// Free-text mode; bytes stream through verbatim.
    Say,
    /// Tool mode; bytes buffer until the stream ends.
    Tool,
}

/// Final outcome of a grammar-constrained generation.
#[derive(Debug)]
pub enum DualModeOutcome {
    /// Free text. Already streamed through [`DualModeParser::push`].
    Say {
        /// The full spoken text, prefix removed.
        text: String,
    },
    /// One or more tool calls with freshly minted ids.
    ToolCalls(Vec<ToolCall>),
    /// The output matched neither branch or carried malformed JSON. The
    /// turn finishes with the raw buffer as content and no tool calls.
    Malformed {
        /// Everything the model produced.
        raw: String,
    },
}

/// Incremental parser for the `SAY:` / `TOOL:` output grammar.
///
/// Feed streamed fragments through [`push`](Self::push); under `SAY:` it
/// returns text to forward as soon as the prefix disambiguates, under
/// `TOOL:` it returns nothing and the calls come out of
/// [`finish`](Self::finish).
#[derive(Debug)]
pub struct DualModeParser {
    state: DualState,
    buffer: String,
    /// Bytes of say-content already returned by `push`.
    streamed: usize,
}

impl Default for DualModeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DualModeParser {
    /// Create a parser awaiting the first bytes.
    pub fn new() -> Self {
        Self {
            state: DualState::Detecting,
            buffer: String::new(),
            streamed: 0,
        }
    }

    /// Append a streamed fragment.
    ///
    /// Returns text to stream onward when (and only when) the parser is in
    /// `SAY` mode.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);
        if self.state == DualState::Detecting {
            self.detect();
        }
        if self.state != DualState::Say {
            return None;
        }
        let content = self.say_content();
        if self.streamed >= content.len() {
            return None;
        }
        let fresh = content[self.streamed..].to_owned();
        self.streamed = content.len();
        Some(fresh)
    }

    /// Decide the branch once enough bytes have arrived.
    fn detect(&mut self) {
        let trimmed = self.buffer.trim_start();
        if trimmed.starts_with(SAY_PREFIX) {
            self.state = DualState::Say;
        } else if trimmed.starts_with(TOOL_PREFIX) {
            self.state = DualState::Tool;
        }
        // A strict prefix of either keyword stays undetermined; anything
        // else is left undetermined too and surfaces as Malformed at
        // finish().
    }

    /// The say-branch content with the prefix and one leading space removed.
    fn say_content(&self) -> &str {
        let trimmed = self.buffer.trim_start();
        let content = trimmed.strip_prefix(SAY_PREFIX).unwrap_or(trimmed);
        content.strip_prefix(' ').unwrap_or(content)
    }

    /// Consume the parser when the stream ends.
    pub fn finish(self, minter: &CallIdMinter) -> DualModeOutcome {
        match self.state {
            DualState::Say => DualModeOutcome::Say {
                text: self.say_content().to_owned(),
            },
            DualState::Tool => {
                let trimmed = self.buffer.trim_start();
                let payload = trimmed.strip_prefix(TOOL_PREFIX).unwrap_or(trimmed).trim();
                match parse_tool_array(payload, minter) {
                    Some(calls) => DualModeOutcome::ToolCalls(calls),
                    None => DualModeOutcome::Malformed { raw: self.buffer },
                }
            }
            DualState::Detecting => DualModeOutcome::Malformed { raw: self.buffer },
        }
    }
}

/// Parse `[ {"name": ..., "arguments": {...}}, ... ]` into minted calls.
fn parse_tool_array(payload: &str, minter: &CallIdMinter) -> Option<Vec<ToolCall>> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let entries = value.as_array()?;
    let mut calls = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.get("name")?.as_str()?.to_owned();
        let arguments = entry
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        calls.push(ToolCall {
            id: minter.mint(),
            name,
            arguments,
        });
    }
    Some(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn minted_ids_are_unique_and_monotonic() {
        let minter = CallIdMinter::new();
        let ids: Vec<String> = (0..32).map(|_| minter.mint()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids[0].starts_with("call_0_"));
        assert!(ids[31].starts_with("call_31_"));
    }

    // ── prompt-injected ───────────────────────────────────────

    #[test]
    fn plain_reply_is_not_a_tool_call() {
        let minter = CallIdMinter::new();
        assert!(parse_prompt_injected("The answer is five.", &minter).is_none());
    }

    #[test]
    fn exact_document_parses() {
        let minter = CallIdMinter::new();
        let content = r#"{"tool_call": {"name": "roll_dice", "arguments": {"notation": "2d6"}}}"#;
        let calls = parse_prompt_injected(content, &minter).expect("parsed in test");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "roll_dice");
        assert_eq!(calls[0].arguments["notation"], "2d6");
        assert!(calls[0].id.starts_with("call_0_"));
    }

    #[test]
    fn missing_arguments_default_to_empty_object() {
        let minter = CallIdMinter::new();
        let content = r#"{"tool_call": {"name": "ping"}}"#;
        let calls = parse_prompt_injected(content, &minter).expect("parsed in test");
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn embedded_document_is_found_by_the_balanced_scan() {
        let minter = CallIdMinter::new();
        let content =
            r#"Sure, let me look that up. {"tool_call": {"name": "weather", "arguments": {"city": "Oslo"}}} Done."#;
        let calls = parse_prompt_injected(content, &minter).expect("parsed in test");
        assert_eq!(calls[0].name, "weather");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let minter = CallIdMinter::new();
        let content = r#"{"tool_call": {"name": "echo", "arguments": {"text": "curly } brace {"}}}"#;
        let calls = parse_prompt_injected(content, &minter).expect("parsed in test");
        assert_eq!(calls[0].arguments["text"], "curly } brace {");
    }

    #[test]
    fn marker_in_prose_without_json_is_a_reply() {
        let minter = CallIdMinter::new();
        let content = "I would emit \"tool_call\" here but there is nothing to call.";
        assert!(parse_prompt_injected(content, &minter).is_none());
    }

    // ── dual mode ─────────────────────────────────────────────

    #[test]
    fn say_streams_after_prefix() {
        let mut parser = DualModeParser::new();
        assert_eq!(parser.push("SA"), None);
        assert_eq!(parser.push("Y: Hel").as_deref(), Some("Hel"));
        assert_eq!(parser.push("lo there.").as_deref(), Some("lo there."));
        let minter = CallIdMinter::new();
        match parser.finish(&minter) {
            DualModeOutcome::Say { text } => assert_eq!(text, "Hello there."),
            other => panic!("expected Say, got {other:?}"),
        }
    }

    #[test]
    fn tool_buffers_until_finish() {
        let mut parser = DualModeParser::new();
        assert_eq!(parser.push("TOOL: [{\"name\": \"roll_dice\","), None);
        assert_eq!(parser.push(" \"arguments\": {\"notation\": \"2d6\"}}]"), None);
        let minter = CallIdMinter::new();
        match parser.finish(&minter) {
            DualModeOutcome::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "roll_dice");
                assert!(calls[0].id.starts_with("call_0_"));
            }
            other => panic!("expected ToolCalls, got {other:?}"),
        }
    }

    #[test]
    fn tool_array_with_multiple_calls_mints_distinct_ids() {
        let mut parser = DualModeParser::new();
        parser.push("TOOL: [{\"name\": \"a\"}, {\"name\": \"b\"}]");
        let minter = CallIdMinter::new();
        match parser.finish(&minter) {
            DualModeOutcome::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert_ne!(calls[0].id, calls[1].id);
            }
            other => panic!("expected ToolCalls, got {other:?}"),
        }
    }

    #[test]
    fn malformed_tool_json_keeps_the_raw_buffer() {
        let mut parser = DualModeParser::new();
        parser.push("TOOL: [{not json");
        let minter = CallIdMinter::new();
        match parser.finish(&minter) {
            DualModeOutcome::Malformed { raw } => assert_eq!(raw, "TOOL: [{not json"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn leading_whitespace_is_skipped_before_detection() {
        let mut parser = DualModeParser::new();
        assert_eq!(parser.push("  \n SAY: hi").as_deref(), Some("hi"));
    }

    #[test]
    fn unknown_prefix_is_malformed() {
        let mut parser = DualModeParser::new();
        assert_eq!(parser.push("CHAT: hi"), None);
        let minter = CallIdMinter::new();
        assert!(matches!(
            parser.finish(&minter),
            DualModeOutcome::Malformed { .. }
        ));
    }
}
