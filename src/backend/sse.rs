//! Server-Sent Events parser for streaming LLM responses.
//!
//! Converts a byte stream into structured [`SseEvent`]s. Handles
//! multi-line `data:` fields, comment lines, `\r\n` endings and the
//! `[DONE]` sentinel.

/// A parsed Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event type (from `event:`), if any.
    pub event_type: Option<String>,
    /// The data payload; multiple `data:` lines are joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Whether this event is the `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Accumulates field lines until an event boundary.
#[derive(Debug, Default)]
struct EventBuilder {
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl EventBuilder {
    fn has_data(&self) -> bool {
        !self.data_lines.is_empty()
    }

    fn build(&mut self) -> SseEvent {
        let event = SseEvent {
            event_type: self.event_type.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        event
    }

    /// Process one line; an empty line is the event boundary.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.has_data() {
                return Some(self.build());
            }
            return None;
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some((field, value)) = parse_field(line) {
            match field {
                "data" => self.data_lines.push(value.to_owned()),
                "event" => self.event_type = Some(value.to_owned()),
                _ => {}
            }
        }
        None
    }
}

/// Split a line into (field, value), stripping one leading space.
fn parse_field(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let field = &line[..colon];
    let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
    Some((field, value))
}

/// Incremental SSE parser fed from a byte stream.
#[derive(Debug, Default)]
pub struct SseLineParser {
    line_buffer: String,
    builder: EventBuilder,
}

impl SseLineParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes; returns the events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(chunk);
        let mut events = Vec::new();
        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line_buffer);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(event) = self.builder.process_line(line) {
                    events.push(event);
                }
            } else {
                self.line_buffer.push(ch);
            }
        }
        events
    }

    /// Flush a trailing event when the stream ends without a final blank
    /// line.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.builder.process_line(line);
        }
        if self.builder.has_data() {
            Some(self.builder.build())
        } else {
            None
        }
    }
}
