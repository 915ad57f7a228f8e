//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Lifecycle status of a work session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Preparing,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    /// Whether the session has reached a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

/// Category of a mutating tracker operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Created,
    Updated,
    Commented,
    Transitioned,
}

/// A derived, user-facing record pairing a mutating tool invocation
/// with its outcome.
///
/// Immutable once produced; appended to the session's action list and
/// never mutated or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledAction {
    pub category: ActionCategory,
    /// Name of the tool that performed the mutation
    pub tool: String,
    /// Short human summary derived from the tool input
    pub summary: String,
    /// External work item key extracted from the result text, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_key: Option<String>,
    pub success: bool,
}

/// Snapshot of the admission slot, for status queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Lifecycle phase of the active session, absent when idle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SessionStatus>,
}
