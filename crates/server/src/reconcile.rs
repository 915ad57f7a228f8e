//! Action reconciliation
//!
//! Classifies agent events and pairs mutating tool calls with their
//! later results to synthesize user-facing action records. The agent
//! event stream carries no call/result correlation id, so pairing is
//! strict FIFO by arrival order plus a content heuristic on the result
//! text. Under parallel tool calls a result can pair with the wrong
//! call when completions arrive out of submission order; that is the
//! documented contract of this module, kept behind this interface so a
//! call-id scheme can replace it without touching the orchestrator.
//!
//! Reconciliation never suppresses raw events: the caller forwards
//! every event unchanged and appends at most the one derived action
//! this module returns.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use workbay_engine_core::AgentEvent;
use workbay_protocol::{ActionCategory, ReconciledAction};

/// External item key: alphanumeric prefix, dash, digits (`DEMO-42`)
static ITEM_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z][A-Za-z0-9]*-\d+\b").expect("item key regex"));

/// Keywords marking a tool result as a tracker response. `error` and
/// `failed` are included so failed mutations still pair (and record
/// their failure) instead of dangling in the queue.
const RESULT_KEYWORDS: &[&str] = &[
    "issue",
    "ticket",
    "created",
    "updated",
    "comment",
    "transition",
    "error",
    "failed",
];

const ERROR_KEYWORDS: &[&str] = &["error", "failed", "failure"];

const SUMMARY_MAX_CHARS: usize = 80;

/// Rule table mapping a tool name to its mutating category, if any.
///
/// A tool mutates the tracked item when its name carries a mutation
/// verb; create/update additionally require an issue/ticket reference
/// so workspace tools (`create_file`, `update_config`) stay unmatched.
/// Comment and transition verbs are tracker-specific enough on their
/// own (`add_comment`, `transition_issue`).
pub fn classify_tool(tool: &str) -> Option<ActionCategory> {
    let name = tool.to_ascii_lowercase();
    let tracker_ref = name.contains("issue") || name.contains("ticket");

    if name.contains("comment") {
        Some(ActionCategory::Commented)
    } else if name.contains("transition") {
        Some(ActionCategory::Transitioned)
    } else if name.contains("create") && tracker_ref {
        Some(ActionCategory::Created)
    } else if name.contains("update") && tracker_ref {
        Some(ActionCategory::Updated)
    } else {
        None
    }
}

/// Whether a result text looks like a tracker response
fn looks_like_tracker_result(text: &str) -> bool {
    if ITEM_KEY_RE.is_match(text) {
        return true;
    }
    let lower = text.to_ascii_lowercase();
    RESULT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn contains_error_keyword(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Short human summary for an action, taken from the most descriptive
/// string field of the tool input.
fn summary_from_input(tool: &str, input: &Value) -> String {
    const FIELDS: &[&str] = &["summary", "title", "comment", "body", "status"];
    let text = FIELDS
        .iter()
        .filter_map(|f| input.get(f))
        .find_map(Value::as_str)
        .unwrap_or(tool);

    let mut summary: String = text.chars().take(SUMMARY_MAX_CHARS).collect();
    if text.chars().count() > SUMMARY_MAX_CHARS {
        summary.push('…');
    }
    summary
}

/// A mutating tool call awaiting its result
#[derive(Debug, Clone)]
struct PendingCall {
    tool: String,
    category: ActionCategory,
    input: Value,
    #[allow(dead_code)]
    sequence: u64,
}

/// Pairs mutating tool calls with their results, oldest first.
///
/// Mutates only its own pending queue; returns at most one derived
/// action per observed event.
#[derive(Default)]
pub struct ActionReconciler {
    pending: VecDeque<PendingCall>,
}

impl ActionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unresolved mutating calls
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Observe one event in stream order.
    pub fn observe(&mut self, event: &AgentEvent) -> Option<ReconciledAction> {
        match event {
            AgentEvent::ToolCall {
                tool,
                input,
                sequence,
            } => {
                if let Some(category) = classify_tool(tool) {
                    self.pending.push_back(PendingCall {
                        tool: tool.clone(),
                        category,
                        input: input.clone(),
                        sequence: *sequence,
                    });
                }
                None
            }

            AgentEvent::ToolResult { content, is_error } => {
                if self.pending.is_empty() || !looks_like_tracker_result(content) {
                    // Unrelated narration; leave the queue untouched.
                    return None;
                }
                let call = self.pending.pop_front().expect("non-empty pending queue");
                let success = !*is_error && !contains_error_keyword(content);
                let item_key = ITEM_KEY_RE
                    .find(content)
                    .map(|m| m.as_str().to_string());

                Some(ReconciledAction {
                    category: call.category,
                    summary: summary_from_input(&call.tool, &call.input),
                    tool: call.tool,
                    item_key,
                    success,
                })
            }

            AgentEvent::Text { .. }
            | AgentEvent::TerminalResult { .. }
            | AgentEvent::Error { .. } => None,
        }
    }
}
