//! Configuration types for the orchestrator and its server edge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Default system prompt used when none is configured.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a concise voice assistant. Answer in short spoken \
     sentences. Use the available tools when they help.";

/// Filler phrases spoken while a tool call runs.
const DEFAULT_FILLER_PHRASES: [&str; 4] = [
    "Let me check that for you. ",
    "One moment. ",
    "Just a second. ",
    "Looking into it. ",
];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Orchestrator behaviour (tool loop, filler phrases, system prompt).
    pub pipeline: PipelineConfig,
    /// Cloud LLM back-end settings.
    pub openai: OpenAiConfig,
    /// Server edge settings.
    pub server: ServerConfig,
}

/// How a non-native-tools back-end encodes tool calls in its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallFormat {
    /// A single JSON document `{"tool_call": {...}}` detected after the
    /// full response is buffered.
    #[default]
    PromptInjected,
    /// Grammar-constrained `SAY: ...` / `TOOL: [...]` dual-mode output,
    /// detected from the stream prefix.
    Grammar,
}

/// Orchestrator behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// System prompt seeded into every conversation.
    pub system_prompt: String,
    /// Upper bound on LLM calls per turn.
    pub max_tool_iterations: usize,
    /// Phrases spoken round-robin while a tool executes. Empty disables
    /// filler speech.
    pub filler_phrases: Vec<String>,
    /// Starting index for the filler round-robin. Tests inject this for
    /// determinism.
    pub filler_start_index: usize,
    /// Tool-call encoding for back-ends without native tool support.
    pub tool_call_format: ToolCallFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_tool_iterations: 10,
            filler_phrases: DEFAULT_FILLER_PHRASES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            filler_start_index: 0,
            tool_call_format: ToolCallFormat::PromptInjected,
        }
    }
}

/// Cloud LLM back-end configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key. Usually supplied via the `OPENAI_API_KEY` environment
    /// variable rather than the config file.
    pub api_key: String,
    /// Base URL of the API host.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling threshold.
    pub top_p: f64,
    /// Maximum tokens per generation.
    pub max_tokens: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1024,
        }
    }
}

/// Server edge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the WebSocket listener.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8970".to_owned(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist. `OPENAI_API_KEY` in the environment
    /// overrides the file value.
    ///
    /// # Errors
    ///
    /// Returns a config error when the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| PipelineError::Config(format!("failed to read {}: {e}", path.display())))?;
            toml::from_str(&raw)
                .map_err(|e| PipelineError::Config(format!("failed to parse {}: {e}", path.display())))?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.trim().is_empty()
        {
            config.openai.api_key = key;
        }

        Ok(config)
    }

    /// Default config file location (`<config_dir>/parlance/parlance.toml`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parlance")
            .join("parlance.toml")
    }
}
