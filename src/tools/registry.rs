//! Tool registry.
//!
//! Holds the name→tool map plus an ordered list of executor-free
//! definitions for LLM exposure. Registration order is preserved in the
//! definitions so prompt injection stays deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::{Tool, ToolDefinition};

/// Registry of tools available to one pipeline.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let definition = tool.definition();
        if let Some(existing) = self
            .definitions
            .iter_mut()
            .find(|d| d.name == definition.name)
        {
            *existing = definition;
        } else {
            self.definitions.push(definition);
        }
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Remove a tool by name. Returns whether it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.definitions.retain(|d| d.name != name);
        self.tools.remove(name).is_some()
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Definitions as a JSON document.
    ///
    /// Used both for back-ends that accept a tools list natively and for
    /// prompt injection on back-ends that don't.
    pub fn definitions_document(&self) -> serde_json::Value {
        serde_json::json!(self.definitions)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.definitions.iter().map(|d| &d.name).collect::<Vec<_>>())
            .finish()
    }
}
