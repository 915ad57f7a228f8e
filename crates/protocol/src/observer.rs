//! Server → Observer messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ReconciledAction;

/// Events pushed to the observer of a work session.
///
/// The stream mirrors the agent's own event order exactly; the only
/// inserted events are `Action` records (immediately after the tool
/// result that produced them) and the single terminal event
/// (`Complete` or `Aborted`) that ends the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// Free-form narration from the agent or the server
    Text { content: String },

    /// The agent invoked a tool
    ToolCall {
        tool: String,
        input: Value,
        sequence: u64,
    },

    /// A tool returned a result
    ToolResult {
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// A mutating tool call was paired with its result
    Action { action: ReconciledAction },

    /// Terminal: the session finished (successfully or not)
    Complete {
        success: bool,
        summary: String,
    },

    /// Terminal: the session was aborted by the caller
    Aborted,
}

impl ObserverEvent {
    /// Whether this event ends the session's observable stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Aborted)
    }
}
