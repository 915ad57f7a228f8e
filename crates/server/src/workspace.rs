//! Workspace provisioning
//!
//! Prepares a disposable per-session directory and clones the
//! requested repositories into it. Clone failures are narrated and
//! skipped; a session may proceed with zero repositories; only
//! failure to create the directory itself (or cancellation) stops
//! provisioning.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::git::RepoCloner;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("provisioning cancelled")]
    Cancelled,
}

/// A prepared, exclusively-owned session workspace
#[derive(Debug)]
pub struct PreparedWorkspace {
    pub dir: PathBuf,
    /// Short names of the repositories that cloned successfully,
    /// in request order
    pub repos: Vec<String>,
}

/// Last path segment of `org/group/repo`
pub fn repo_short_name(repo_path: &str) -> &str {
    repo_path.rsplit('/').next().unwrap_or(repo_path)
}

/// Prepare the workspace for one session.
///
/// A stale directory left by a crashed prior run is destroyed first.
/// Every clone attempt emits one narration line through `narrate`,
/// success and failure alike. Cancellation is checked before each
/// clone so an abort never waits on network I/O it hasn't started.
pub async fn prepare_workspace(
    root: &Path,
    session_key: &str,
    repo_list: &[String],
    cloner: &dyn RepoCloner,
    cancel: &CancellationToken,
    narrate: &(dyn Fn(String) + Send + Sync),
) -> Result<PreparedWorkspace, WorkspaceError> {
    let dir = root.join(session_key);
    if dir.exists() {
        warn!(
            component = "workspace",
            event = "workspace.stale_removed",
            dir = %dir.display(),
            "Removing stale workspace from a prior run"
        );
        tokio::fs::remove_dir_all(&dir).await?;
    }
    tokio::fs::create_dir_all(&dir).await?;

    let mut repos = Vec::new();
    for repo_path in repo_list {
        let repo_path = repo_path.trim();
        if repo_path.is_empty() {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(WorkspaceError::Cancelled);
        }

        let short = repo_short_name(repo_path);
        let dest = dir.join(short);
        narrate(format!("Cloning {repo_path}...\n"));

        match cloner.clone_repo(repo_path, &dest).await {
            Ok(()) => {
                info!(
                    component = "workspace",
                    event = "workspace.cloned",
                    repo = %repo_path,
                );
                narrate(format!("Cloned {repo_path}\n"));
                repos.push(short.to_string());
            }
            Err(e) => {
                warn!(
                    component = "workspace",
                    event = "workspace.clone_failed",
                    repo = %repo_path,
                    error = %e,
                );
                narrate(format!("Failed to clone {repo_path}: {e}\n"));
            }
        }
    }

    Ok(PreparedWorkspace { dir, repos })
}
