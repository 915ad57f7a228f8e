//! Work session orchestrator
//!
//! Composes admission, provisioning, the engine and the reconciler
//! into one cancellable background task per session:
//! `Admitting → Preparing → Running → {Completed | Failed | Aborted}`.
//!
//! Exit discipline, on every terminal path, in order: best-effort
//! workspace removal, admission release, exactly one terminal event.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use workbay_engine_core::{AgentEvent, Engine, EngineContext};
use workbay_protocol::{ObserverEvent, SessionStatus};

use crate::admission::{AdmissionController, AdmissionError};
use crate::delivery::DeliveryRegistry;
use crate::git::RepoCloner;
use crate::prompt::work_prompt;
use crate::reconcile::ActionReconciler;
use crate::ticket::TicketTracker;
use crate::workspace::{prepare_workspace, WorkspaceError};

/// Orchestrator tuning, resolved once at startup
pub struct OrchestratorConfig {
    /// Parent directory for per-session workspaces
    pub work_root: PathBuf,
    /// Tool capability allow-list handed to the engine
    pub allowed_tools: Vec<String>,
    /// Maximum agent turn budget
    pub max_turns: u32,
    /// How long an aborted session waits for the engine to stop
    /// before abandoning it
    pub engine_grace: Duration,
}

/// Tools the agent may use: tracker mutations, filesystem read/write,
/// shell for git.
pub fn default_allowed_tools() -> Vec<String> {
    [
        "create_issue",
        "update_issue",
        "add_comment",
        "transition_issue",
        "get_issue",
        "search",
        "Read",
        "Write",
        "Edit",
        "Glob",
        "Grep",
        "Bash",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Everything a session task needs, shared once behind an `Arc`
pub struct SessionDeps {
    pub admission: Arc<AdmissionController>,
    pub delivery: Arc<DeliveryRegistry>,
    pub tracker: Arc<dyn TicketTracker>,
    pub cloner: Arc<dyn RepoCloner>,
    pub engine: Arc<dyn Engine>,
    pub config: OrchestratorConfig,
}

/// Caller request to start work on one item
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub project_key: String,
    pub work_item_key: String,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub task_context: Option<String>,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Conflict(#[from] AdmissionError),

    #[error("invalid work item key: {0}")]
    InvalidKey(String),

    #[error("work item {key} does not belong to project {project}")]
    WrongProject { key: String, project: String },

    #[error("no repositories configured")]
    NoRepositories,
}

/// Validate a request and spawn the session task.
///
/// Validation failures never touch the admission slot. On success the
/// session runs as an independently cancellable background task and
/// this returns immediately.
pub fn start_session(
    deps: &Arc<SessionDeps>,
    caller_id: &str,
    req: StartRequest,
) -> Result<(), StartError> {
    let key = parse_item_key(&req.work_item_key)
        .ok_or_else(|| StartError::InvalidKey(req.work_item_key.clone()))?;

    let project = req.project_key.trim().to_ascii_uppercase();
    if !key.starts_with(&format!("{project}-")) {
        return Err(StartError::WrongProject { key, project });
    }

    if req.repos.iter().all(|r| r.trim().is_empty()) {
        return Err(StartError::NoRepositories);
    }

    let cancel = deps.admission.try_acquire(caller_id)?;
    let session_id = workbay_protocol::new_id();

    info!(
        component = "orchestrator",
        event = "session.started",
        session_id = %session_id,
        caller_id = %caller_id,
        work_item = %key,
        repo_count = req.repos.len(),
        "Work session admitted"
    );

    let deps = Arc::clone(deps);
    let caller_id = caller_id.to_string();
    tokio::spawn(run_session(deps, session_id, caller_id, key, req, cancel));
    Ok(())
}

/// Work item key: alphanumeric project prefix, dash, digits
fn parse_item_key(raw: &str) -> Option<String> {
    let key = raw.trim().to_ascii_uppercase();
    let (prefix, number) = key.split_once('-')?;
    let mut chars = prefix.chars();
    let leading_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !leading_alpha || !chars.all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(key)
}

enum Outcome {
    Completed(String),
    Failed(String),
    Aborted,
}

/// One end-to-end session. Owns the session state exclusively; the
/// admission controller keeps only the cancel handle.
async fn run_session(
    deps: Arc<SessionDeps>,
    session_id: String,
    caller_id: String,
    key: String,
    req: StartRequest,
    cancel: CancellationToken,
) {
    let workspace_dir = deps.config.work_root.join(&key);
    let outcome = drive(&deps, &caller_id, &key, &req, &cancel).await;

    // Exit discipline (a): best-effort workspace removal.
    if let Err(e) = tokio::fs::remove_dir_all(&workspace_dir).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(
                component = "orchestrator",
                event = "session.cleanup_failed",
                dir = %workspace_dir.display(),
                error = %e,
                "Failed to remove workspace directory"
            );
        }
    }

    // Exit discipline (b): release the admission slot.
    deps.admission.release();

    // Exit discipline (c): exactly one terminal event.
    let (status, terminal) = match outcome {
        Outcome::Completed(summary) => (
            SessionStatus::Completed,
            ObserverEvent::Complete {
                success: true,
                summary,
            },
        ),
        Outcome::Failed(error) => {
            error!(
                component = "orchestrator",
                event = "session.failed",
                work_item = %key,
                error = %error,
            );
            (
                SessionStatus::Failed,
                ObserverEvent::Complete {
                    success: false,
                    summary: error,
                },
            )
        }
        Outcome::Aborted => (SessionStatus::Aborted, ObserverEvent::Aborted),
    };
    debug_assert!(status.is_terminal());
    deps.delivery.push(&caller_id, terminal);

    info!(
        component = "orchestrator",
        event = "session.finished",
        session_id = %session_id,
        work_item = %key,
        status = ?status,
        "Work session finished"
    );
}

async fn drive(
    deps: &Arc<SessionDeps>,
    caller_id: &str,
    key: &str,
    req: &StartRequest,
    cancel: &CancellationToken,
) -> Outcome {
    let narrate = |content: String| {
        deps.delivery.push(caller_id, ObserverEvent::Text { content });
    };

    // Preparing
    deps.admission.set_phase(SessionStatus::Preparing);
    narrate(format!("Fetching ticket {key}...\n"));
    let mut item = match deps.tracker.get_item(key).await {
        Ok(item) => item,
        Err(e) => return Outcome::Failed(format!("Failed to fetch work item: {e}")),
    };
    if item.description.is_none() {
        item.description = req.task_context.clone();
    }
    narrate(format!("Ticket: {}\n\n", item.summary));

    let prepared = match prepare_workspace(
        &deps.config.work_root,
        key,
        &req.repos,
        deps.cloner.as_ref(),
        cancel,
        &narrate,
    )
    .await
    {
        Ok(prepared) => prepared,
        Err(WorkspaceError::Cancelled) => return Outcome::Aborted,
        Err(e) => return Outcome::Failed(format!("Failed to prepare workspace: {e}")),
    };

    narrate("\nStarting AI work...\n\n".to_string());

    // Running
    let ctx = EngineContext {
        prompt: work_prompt(&item, &prepared.repos, req.task_context.as_deref()),
        workspace_dir: prepared.dir,
        allowed_tools: deps.config.allowed_tools.clone(),
        max_turns: deps.config.max_turns,
        cancel: cancel.child_token(),
    };
    let mut run = match deps.engine.start(ctx).await {
        Ok(run) => run,
        Err(e) => return Outcome::Failed(format!("Failed to start engine: {e}")),
    };
    deps.admission.set_phase(SessionStatus::Running);

    let mut reconciler = ActionReconciler::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // The engine saw the child token fire; wait a bounded
                // grace for its stream to close, then abandon it.
                let drained = tokio::time::timeout(deps.config.engine_grace, async {
                    while run.events.recv().await.is_some() {}
                })
                .await;
                if drained.is_err() {
                    warn!(
                        component = "orchestrator",
                        event = "session.engine_abandoned",
                        work_item = %key,
                        "Engine did not stop within the grace period"
                    );
                }
                return Outcome::Aborted;
            }

            event = run.events.recv() => {
                let Some(event) = event else {
                    return Outcome::Failed("engine stream ended unexpectedly".to_string());
                };
                match &event {
                    AgentEvent::TerminalResult { summary } => {
                        return Outcome::Completed(summary.clone());
                    }
                    AgentEvent::Error { message } => {
                        return Outcome::Failed(message.clone());
                    }
                    AgentEvent::Text { content } => {
                        deps.delivery.push(caller_id, ObserverEvent::Text {
                            content: content.clone(),
                        });
                    }
                    AgentEvent::ToolCall { tool, input, sequence } => {
                        deps.delivery.push(caller_id, ObserverEvent::ToolCall {
                            tool: tool.clone(),
                            input: input.clone(),
                            sequence: *sequence,
                        });
                    }
                    AgentEvent::ToolResult { content, is_error } => {
                        deps.delivery.push(caller_id, ObserverEvent::ToolResult {
                            content: content.clone(),
                            is_error: *is_error,
                        });
                    }
                }
                // The derived action, if any, follows the raw event
                // that triggered it.
                if let Some(action) = reconciler.observe(&event) {
                    deps.delivery.push(caller_id, ObserverEvent::Action { action });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use workbay_engine_core::{EngineError, EngineRun};
    use workbay_protocol::ActionCategory;

    use crate::delivery::ObserverReceiver;
    use crate::git::CloneError;
    use crate::ticket::InlineTracker;

    /// Cloner that mkdirs every destination
    struct OkCloner;

    #[async_trait]
    impl RepoCloner for OkCloner {
        async fn clone_repo(&self, _repo: &str, dest: &Path) -> Result<(), CloneError> {
            std::fs::create_dir_all(dest).unwrap();
            Ok(())
        }
    }

    /// Engine that replays a script, then either closes the stream or
    /// hangs until cancelled.
    struct StubEngine {
        events: Vec<AgentEvent>,
        hang_after: bool,
    }

    #[async_trait]
    impl Engine for StubEngine {
        async fn start(&self, ctx: EngineContext) -> Result<EngineRun, EngineError> {
            let (tx, rx) = mpsc::channel(32);
            let events = self.events.clone();
            let hang = self.hang_after;
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                if hang {
                    ctx.cancel.cancelled().await;
                }
                // tx drops: stream closes
            });
            Ok(EngineRun { events: rx })
        }
    }

    fn request() -> StartRequest {
        StartRequest {
            project_key: "demo".to_string(),
            work_item_key: "demo-1".to_string(),
            repos: vec!["org/api".to_string()],
            task_context: None,
        }
    }

    fn deps_with(engine: StubEngine, work_root: &Path) -> Arc<SessionDeps> {
        Arc::new(SessionDeps {
            admission: Arc::new(AdmissionController::new()),
            delivery: Arc::new(DeliveryRegistry::new()),
            tracker: Arc::new(InlineTracker),
            cloner: Arc::new(OkCloner),
            engine: Arc::new(engine),
            config: OrchestratorConfig {
                work_root: work_root.to_path_buf(),
                allowed_tools: default_allowed_tools(),
                max_turns: 10,
                engine_grace: Duration::from_secs(1),
            },
        })
    }

    /// Receive events until the terminal one, with a watchdog.
    async fn drain_to_terminal(rx: &mut ObserverReceiver) -> Vec<ObserverEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for terminal event")
                .expect("delivery channel closed before terminal event");
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    #[test]
    fn item_key_parsing() {
        assert_eq!(parse_item_key("demo-12").as_deref(), Some("DEMO-12"));
        assert_eq!(parse_item_key(" ab2-7 ").as_deref(), Some("AB2-7"));
        assert!(parse_item_key("demo").is_none());
        assert!(parse_item_key("demo-").is_none());
        assert!(parse_item_key("-12").is_none());
        assert!(parse_item_key("2demo-1").is_none());
        assert!(parse_item_key("demo-1x").is_none());
    }

    #[tokio::test]
    async fn validation_failures_never_touch_admission() {
        let root = tempfile::tempdir().unwrap();
        let deps = deps_with(
            StubEngine {
                events: vec![],
                hang_after: false,
            },
            root.path(),
        );

        let mut bad_key = request();
        bad_key.work_item_key = "not a key".to_string();
        assert!(matches!(
            start_session(&deps, "alice", bad_key),
            Err(StartError::InvalidKey(_))
        ));

        let mut wrong_project = request();
        wrong_project.project_key = "OTHER".to_string();
        assert!(matches!(
            start_session(&deps, "alice", wrong_project),
            Err(StartError::WrongProject { .. })
        ));

        let mut no_repos = request();
        no_repos.repos = vec!["  ".to_string()];
        assert!(matches!(
            start_session(&deps, "alice", no_repos),
            Err(StartError::NoRepositories)
        ));

        assert!(!deps.admission.status().active);
    }

    #[tokio::test]
    async fn completed_session_runs_the_exit_discipline() {
        let root = tempfile::tempdir().unwrap();
        let deps = deps_with(
            StubEngine {
                events: vec![
                    AgentEvent::Text {
                        content: "analyzing".to_string(),
                    },
                    AgentEvent::TerminalResult {
                        summary: "implemented and pushed".to_string(),
                    },
                ],
                hang_after: false,
            },
            root.path(),
        );
        let mut rx = deps.delivery.subscribe("alice");

        start_session(&deps, "alice", request()).unwrap();
        let events = drain_to_terminal(&mut rx).await;

        assert!(matches!(
            events.last(),
            Some(ObserverEvent::Complete { success: true, summary }) if summary == "implemented and pushed"
        ));
        // Terminal event is pushed after release and cleanup, so both
        // already happened.
        assert!(!deps.admission.status().active);
        assert!(!root.path().join("DEMO-1").exists());
    }

    #[tokio::test]
    async fn second_start_conflicts_while_running() {
        let root = tempfile::tempdir().unwrap();
        let deps = deps_with(
            StubEngine {
                events: vec![AgentEvent::Text {
                    content: "working".to_string(),
                }],
                hang_after: true,
            },
            root.path(),
        );
        let mut rx = deps.delivery.subscribe("alice");

        start_session(&deps, "alice", request()).unwrap();
        assert!(matches!(
            start_session(&deps, "bob", request()),
            Err(StartError::Conflict(AdmissionError::Conflict))
        ));

        deps.admission.abort();
        let events = drain_to_terminal(&mut rx).await;
        assert!(matches!(events.last(), Some(ObserverEvent::Aborted)));
        assert!(!deps.admission.status().active);

        // Slot is free again
        assert!(deps.admission.try_acquire("bob").is_ok());
    }

    #[tokio::test]
    async fn double_abort_emits_one_aborted_event() {
        let root = tempfile::tempdir().unwrap();
        let deps = deps_with(
            StubEngine {
                events: vec![AgentEvent::Text {
                    content: "working".to_string(),
                }],
                hang_after: true,
            },
            root.path(),
        );
        let mut rx = deps.delivery.subscribe("alice");

        start_session(&deps, "alice", request()).unwrap();
        // Wait for the session to actually be running
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, ObserverEvent::Text { .. }));

        assert!(deps.admission.abort());
        assert!(!deps.admission.abort()); // second abort: no-op

        let events = drain_to_terminal(&mut rx).await;
        let aborted = events
            .iter()
            .filter(|e| matches!(e, ObserverEvent::Aborted))
            .count();
        assert_eq!(aborted, 1);
        assert!(!root.path().join("DEMO-1").exists());
    }

    #[tokio::test]
    async fn engine_crash_mid_stream_fails_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        // Three events, then the stream closes without a terminal.
        let deps = deps_with(
            StubEngine {
                events: vec![
                    AgentEvent::Text {
                        content: "one".to_string(),
                    },
                    AgentEvent::Text {
                        content: "two".to_string(),
                    },
                    AgentEvent::Text {
                        content: "three".to_string(),
                    },
                ],
                hang_after: false,
            },
            root.path(),
        );
        let mut rx = deps.delivery.subscribe("alice");

        start_session(&deps, "alice", request()).unwrap();
        let events = drain_to_terminal(&mut rx).await;

        // Narration from provisioning, then exactly the 3 agent events,
        // then one failed Complete.
        let agent_texts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Text { content }
                    if ["one", "two", "three"].contains(&content.as_str()) =>
                {
                    Some(content.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(agent_texts, vec!["one", "two", "three"]);
        assert!(matches!(
            events.last(),
            Some(ObserverEvent::Complete { success: false, .. })
        ));
        assert!(!root.path().join("DEMO-1").exists());
        assert!(!deps.admission.status().active);
    }

    #[tokio::test]
    async fn engine_error_event_fails_the_session() {
        let root = tempfile::tempdir().unwrap();
        let deps = deps_with(
            StubEngine {
                events: vec![AgentEvent::Error {
                    message: "model overloaded".to_string(),
                }],
                hang_after: false,
            },
            root.path(),
        );
        let mut rx = deps.delivery.subscribe("alice");

        start_session(&deps, "alice", request()).unwrap();
        let events = drain_to_terminal(&mut rx).await;
        assert!(matches!(
            events.last(),
            Some(ObserverEvent::Complete { success: false, summary }) if summary == "model overloaded"
        ));
    }

    #[tokio::test]
    async fn reconciled_actions_follow_their_results_in_fifo_order() {
        let root = tempfile::tempdir().unwrap();
        let deps = deps_with(
            StubEngine {
                events: vec![
                    AgentEvent::ToolCall {
                        tool: "create_issue".to_string(),
                        input: json!({"summary": "x"}),
                        sequence: 1,
                    },
                    AgentEvent::ToolCall {
                        tool: "create_issue".to_string(),
                        input: json!({"summary": "y"}),
                        sequence: 2,
                    },
                    AgentEvent::ToolResult {
                        content: "Created DEMO-2".to_string(),
                        is_error: false,
                    },
                    AgentEvent::ToolResult {
                        content: "Created DEMO-1".to_string(),
                        is_error: false,
                    },
                    AgentEvent::TerminalResult {
                        summary: "done".to_string(),
                    },
                ],
                hang_after: false,
            },
            root.path(),
        );
        let mut rx = deps.delivery.subscribe("alice");

        start_session(&deps, "alice", request()).unwrap();
        let events = drain_to_terminal(&mut rx).await;

        let actions: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Action { action } => Some(action.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].summary, "x");
        assert_eq!(actions[0].item_key.as_deref(), Some("DEMO-2"));
        assert_eq!(actions[1].summary, "y");
        assert_eq!(actions[1].item_key.as_deref(), Some("DEMO-1"));
        assert!(actions.iter().all(|a| a.category == ActionCategory::Created));

        // Each action arrives immediately after its raw tool result.
        let positions: Vec<_> = events
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e {
                ObserverEvent::ToolResult { .. } => Some(i),
                _ => None,
            })
            .collect();
        for pos in positions {
            assert!(matches!(events[pos + 1], ObserverEvent::Action { .. }));
        }
    }
}
