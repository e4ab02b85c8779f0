//! Tool definitions, registry and output-format parsing.

pub mod parser;
pub mod registry;
pub mod types;

pub use parser::{CallIdMinter, DualModeOutcome, DualModeParser, parse_prompt_injected};
pub use registry::ToolRegistry;
pub use types::{Tool, ToolDefinition};
