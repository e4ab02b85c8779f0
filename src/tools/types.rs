//! Core tool types.
//!
//! A [`Tool`] bundles its LLM-facing metadata with an async executor.
//! [`ToolDefinition`] is the executor-free view handed to LLM back-ends.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The definition of a tool as exposed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name within a pipeline.
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A callable tool.
///
/// Implementations must be `Send + Sync`; `execute` may run concurrently
/// from different sessions.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// The tool name (unique within a pipeline).
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool.
    ///
    /// # Errors
    ///
    /// Execution failures are absorbed into the conversation as an error
    /// payload; they never abort the turn.
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, PipelineError>;

    /// The executor-free definition for LLM exposure.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema())
    }
}
