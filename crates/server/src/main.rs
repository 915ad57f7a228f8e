//! Workbay Server
//!
//! Runs one autonomous coding-agent session at a time against a work
//! item: prepares a disposable workspace, drives the agent, reconciles
//! its tool activity into user-facing actions, and streams everything
//! live to the requesting caller over WebSocket.

mod admission;
mod config;
mod delivery;
mod git;
mod http;
mod logging;
mod orchestrator;
mod prompt;
mod reconcile;
mod ticket;
mod workspace;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use workbay_engine_process::ProcessEngine;

use crate::admission::AdmissionController;
use crate::config::Cli;
use crate::delivery::DeliveryRegistry;
use crate::git::GitCloner;
use crate::orchestrator::{default_allowed_tools, OrchestratorConfig, SessionDeps};
use crate::ticket::InlineTracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let _logging = logging::init_logging(&data_dir)?;

    info!(
        component = "server",
        event = "server.starting",
        bind = %cli.bind,
        work_root = %cli.work_root().display(),
    );

    let (program, args) = cli.engine_command();
    let deps = Arc::new(SessionDeps {
        admission: Arc::new(AdmissionController::new()),
        delivery: Arc::new(DeliveryRegistry::new()),
        tracker: Arc::new(InlineTracker),
        cloner: Arc::new(GitCloner::new(
            cli.git_host.clone(),
            cli.git_token.clone(),
            cli.clone_timeout(),
        )),
        engine: Arc::new(ProcessEngine::new(program, args)),
        config: OrchestratorConfig {
            work_root: cli.work_root(),
            allowed_tools: default_allowed_tools(),
            max_turns: cli.max_turns,
            engine_grace: cli.engine_grace(),
        },
    });

    let app = http::router(deps);

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    info!(
        component = "server",
        event = "server.listening",
        addr = %cli.bind,
    );
    axum::serve(listener, app).await?;

    Ok(())
}
