//! Stdin/stdout transport: one JSON frame per line.
//!
//! Lets a parent process drive a session without a socket. Stdout is
//! reserved for the protocol; all diagnostics must go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Stdin, Stdout};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::wire::handler::{FrameTransport, run_session};

/// Newline-delimited JSON over stdin/stdout.
pub struct StdioTransport {
    reader: BufReader<Stdin>,
    writer: BufWriter<Stdout>,
    line: String,
}

impl StdioTransport {
    /// Wrap the process's stdin and stdout.
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: BufWriter::new(tokio::io::stdout()),
            line: String::new(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FrameTransport for StdioTransport {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line).await {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = self.line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(Ok(trimmed.to_owned()));
                }
                Err(e) => {
                    return Some(Err(PipelineError::Channel(format!(
                        "failed to read from stdin: {e}"
                    ))));
                }
            }
        }
    }

    async fn send(&mut self, frame: &str) -> Result<()> {
        self.writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| PipelineError::Channel(format!("failed to write to stdout: {e}")))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| PipelineError::Channel(format!("failed to write to stdout: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| PipelineError::Channel(format!("failed to flush stdout: {e}")))
    }
}

/// Run one session over stdin/stdout until stdin closes.
///
/// # Errors
///
/// Returns a channel error when stdout becomes unwritable.
pub async fn run_stdio_session(pipeline: Arc<Pipeline>) -> Result<()> {
    info!("serving one session over stdio");
    run_session(pipeline, StdioTransport::new()).await
}
