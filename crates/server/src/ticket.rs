//! Ticket-tracker collaborator
//!
//! The orchestrator needs exactly one read per session: the work item
//! the agent is implementing. Concrete REST clients are deployment
//! glue and live outside this server; the binary wires an inline
//! tracker that synthesizes the item from the request itself.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("work item lookup failed: {0}")]
    Lookup(String),
}

/// One comment on a work item
#[derive(Debug, Clone)]
pub struct WorkItemComment {
    pub author: String,
    pub created: String,
    pub body: String,
}

/// The externally tracked unit of work a session implements
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub key: String,
    pub summary: String,
    pub status: String,
    pub priority: Option<String>,
    pub issue_type: Option<String>,
    pub description: Option<String>,
    pub comments: Vec<WorkItemComment>,
}

/// Read access to the ticket tracker
#[async_trait]
pub trait TicketTracker: Send + Sync {
    /// Fetch one work item; invoked once before session start.
    async fn get_item(&self, key: &str) -> Result<WorkItem, TicketError>;
}

/// Tracker that builds the work item from the start request alone.
///
/// Used when no tracker backend is configured: the agent still gets a
/// well-formed prompt, with the caller-supplied task context standing
/// in for the ticket description.
pub struct InlineTracker;

#[async_trait]
impl TicketTracker for InlineTracker {
    async fn get_item(&self, key: &str) -> Result<WorkItem, TicketError> {
        Ok(WorkItem {
            key: key.to_string(),
            summary: key.to_string(),
            status: "Open".to_string(),
            priority: None,
            issue_type: None,
            description: None,
            comments: Vec::new(),
        })
    }
}
