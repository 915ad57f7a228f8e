//! Workbay Engine Core
//!
//! The AI execution engine abstraction. An engine runs one autonomous
//! agent session against a prepared workspace and emits an ordered
//! stream of [`AgentEvent`]s. Concrete engines (subprocess adapters,
//! test doubles) implement the [`Engine`] trait.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Events emitted by an execution engine for one session.
///
/// Events are produced in a single total order, no reordering, no
/// duplication. `TerminalResult` and `Error` both end the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Free-form narration
    Text { content: String },

    /// The agent invoked a tool. `input` is a JSON object whose key
    /// order matches the argument order the agent supplied.
    ToolCall {
        tool: String,
        input: Value,
        #[serde(default)]
        sequence: u64,
    },

    /// A tool returned. Carries no correlation id; pairing with the
    /// originating call is the consumer's concern.
    ToolResult {
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Final summary; signals stream end
    TerminalResult { summary: String },

    /// Engine failure; signals stream end
    Error { message: String },
}

/// Errors that can occur in engines
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to spawn engine process: {0}")]
    SpawnError(String),

    #[error("Engine communication error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Engine failure: {0}")]
    Failure(String),
}

/// Everything an engine needs to run one session
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Assembled task prompt
    pub prompt: String,
    /// Prepared workspace the agent works in
    pub workspace_dir: PathBuf,
    /// Tool capability allow-list
    pub allowed_tools: Vec<String>,
    /// Maximum turn/step budget
    pub max_turns: u32,
    /// Cooperative cancellation. Engines must make a best effort to
    /// stop when this fires; callers do not wait forever for them.
    pub cancel: CancellationToken,
}

/// A started engine invocation
pub struct EngineRun {
    /// Ordered event stream. The channel closing without a
    /// `TerminalResult` or `Error` event means the engine died.
    pub events: mpsc::Receiver<AgentEvent>,
}

/// An AI execution engine
#[async_trait]
pub trait Engine: Send + Sync {
    /// Start one agent session. Returns once the engine is running;
    /// events arrive on the returned stream.
    async fn start(&self, ctx: EngineContext) -> Result<EngineRun, EngineError>;
}
