//! The turn orchestrator and its supporting types.

pub mod messages;
pub mod orchestrator;
pub mod sentence;

pub use messages::{TurnEvent, TurnEventSender};
pub use orchestrator::{Pipeline, SharedContext};
