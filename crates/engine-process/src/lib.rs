//! NDJSON subprocess engine
//!
//! Spawns a configurable agent CLI as a subprocess and reads one JSON
//! [`AgentEvent`] per stdout line. The prompt is written to stdin; the
//! workspace directory becomes the child's cwd; the turn budget and
//! tool allow-list are passed through the environment
//! (`WORKBAY_MAX_TURNS`, `WORKBAY_ALLOWED_TOOLS`).
//!
//! Cancellation is best-effort: when the context token fires the child
//! is killed and left for the reaper; the event channel closes shortly
//! after.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use workbay_engine_core::{AgentEvent, Engine, EngineContext, EngineError, EngineRun};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine backed by an external agent process speaking NDJSON on stdout
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn start(&self, ctx: EngineContext) -> Result<EngineRun, EngineError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&ctx.workspace_dir)
            .env("WORKBAY_MAX_TURNS", ctx.max_turns.to_string())
            .env("WORKBAY_ALLOWED_TOOLS", ctx.allowed_tools.join(","))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::SpawnError(format!("{}: {e}", self.program)))?;

        info!(
            component = "process_engine",
            event = "engine.spawned",
            program = %self.program,
            workspace = %ctx.workspace_dir.display(),
            "Spawned agent process"
        );

        // Hand the prompt over on stdin from its own task, then close
        // it so the child sees EOF and starts working. A child that
        // floods stdout before reading stdin would otherwise wedge a
        // blocking write here, with the stdout pipe never drained.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::SpawnError("stdin not captured".to_string()))?;
        let prompt = ctx.prompt;
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(
                    component = "process_engine",
                    event = "engine.stdin_write_failed",
                    error = %e,
                );
                return;
            }
            if let Err(e) = stdin.shutdown().await {
                warn!(
                    component = "process_engine",
                    event = "engine.stdin_close_failed",
                    error = %e,
                );
            }
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::SpawnError("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::SpawnError("stderr not captured".to_string()))?;

        // Log child stderr at debug; it is diagnostics, not events.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(
                    component = "process_engine",
                    event = "engine.stderr",
                    line = %line,
                );
            }
        });

        let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(EVENT_CHANNEL_CAPACITY);
        let cancel = ctx.cancel.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!(
                            component = "process_engine",
                            event = "engine.cancelled",
                            "Cancellation requested, killing agent process"
                        );
                        let _ = child.start_kill();
                        break;
                    }
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<AgentEvent>(line) {
                            Ok(event) => {
                                if event_tx.send(event).await.is_err() {
                                    // Consumer gone; stop the child too.
                                    let _ = child.start_kill();
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    component = "process_engine",
                                    event = "engine.parse_failed",
                                    error = %e,
                                    line_len = line.len(),
                                    "Skipping unparseable engine output line"
                                );
                            }
                        }
                    }
                }
            }

            match child.wait().await {
                Ok(status) => debug!(
                    component = "process_engine",
                    event = "engine.exited",
                    code = status.code(),
                    "Agent process exited"
                ),
                Err(e) => warn!(
                    component = "process_engine",
                    event = "engine.wait_failed",
                    error = %e,
                ),
            }
            // event_tx drops here; the consumer sees the stream close.
        });

        Ok(EngineRun { events: event_rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx(dir: &std::path::Path) -> EngineContext {
        EngineContext {
            prompt: "do the thing".to_string(),
            workspace_dir: dir.to_path_buf(),
            allowed_tools: vec!["Read".to_string(), "Bash".to_string()],
            max_turns: 10,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn reads_events_until_stream_end() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new(
            "sh",
            vec![
                "-c".to_string(),
                concat!(
                    "cat > /dev/null; ",
                    r#"printf '{"type":"text","content":"hi"}\n'; "#,
                    r#"printf '{"type":"terminal_result","summary":"done"}\n'"#,
                )
                .to_string(),
            ],
        );

        let mut run = engine.start(ctx(dir.path())).await.unwrap();
        let first = run.events.recv().await.unwrap();
        assert!(matches!(first, AgentEvent::Text { ref content } if content == "hi"));
        let second = run.events.recv().await.unwrap();
        assert!(matches!(second, AgentEvent::TerminalResult { ref summary } if summary == "done"));
        assert!(run.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new(
            "sh",
            vec![
                "-c".to_string(),
                concat!(
                    "cat > /dev/null; ",
                    "echo not-json; ",
                    r#"printf '{"type":"terminal_result","summary":"ok"}\n'"#,
                )
                .to_string(),
            ],
        );

        let mut run = engine.start(ctx(dir.path())).await.unwrap();
        let only = run.events.recv().await.unwrap();
        assert!(matches!(only, AgentEvent::TerminalResult { .. }));
    }

    #[tokio::test]
    async fn chatty_child_does_not_block_start() {
        let dir = tempfile::tempdir().unwrap();
        // The child floods stdout before touching stdin; with a large
        // prompt both pipes fill unless the stdin hand-off runs
        // concurrently with the stdout reader.
        let engine = ProcessEngine::new(
            "sh",
            vec![
                "-c".to_string(),
                concat!(
                    "head -c 200000 /dev/zero | tr '\\0' x; echo; ",
                    "cat > /dev/null; ",
                    r#"printf '{"type":"terminal_result","summary":"ok"}\n'"#,
                )
                .to_string(),
            ],
        );

        let mut context = ctx(dir.path());
        context.prompt = "x".repeat(1_000_000);

        let started = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            engine.start(context),
        )
        .await
        .expect("start must return while the child floods stdout");
        let mut run = started.unwrap();

        // The flood line is unparseable and skipped; the terminal
        // event arrives once the child has drained stdin.
        loop {
            let event = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                run.events.recv(),
            )
            .await
            .expect("timed out waiting for the terminal event");
            match event {
                Some(AgentEvent::TerminalResult { .. }) => break,
                Some(_) => continue,
                None => panic!("stream closed without a terminal event"),
            }
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new("workbay-no-such-binary", vec![]);
        let err = engine.start(ctx(dir.path())).await.err().unwrap();
        assert!(matches!(err, EngineError::SpawnError(_)));
    }

    #[tokio::test]
    async fn cancellation_closes_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"cat > /dev/null; printf '{"type":"text","content":"working"}\n'; sleep 30"#
                    .to_string(),
            ],
        );

        let context = ctx(dir.path());
        let cancel = context.cancel.clone();
        let mut run = engine.start(context).await.unwrap();
        let first = run.events.recv().await.unwrap();
        assert!(matches!(first, AgentEvent::Text { .. }));

        cancel.cancel();
        // Channel closes once the reader loop notices the cancellation.
        assert!(run.events.recv().await.is_none());
    }
}
