//! Server configuration
//!
//! Resolved once at startup from CLI flags with env fallbacks.
//! Data dir priority: `--data-dir` > `WORKBAY_DATA_DIR` > `~/.workbay`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "workbay", about = "Single-flight orchestrator for AI ticket-work sessions")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:4100")]
    pub bind: SocketAddr,

    /// Data directory (logs, per-session workspaces)
    #[arg(long, env = "WORKBAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Parent directory for session workspaces (defaults to
    /// `<data-dir>/work`)
    #[arg(long, env = "WORKBAY_WORK_ROOT")]
    pub work_root: Option<PathBuf>,

    /// Agent engine command; the first word is the program, the rest
    /// are arguments
    #[arg(long, env = "WORKBAY_ENGINE_CMD", default_value = "workbay-agent")]
    pub engine_cmd: String,

    /// Source-control host repositories are cloned from
    #[arg(long, env = "WORKBAY_GIT_HOST", default_value = "gitlab.com")]
    pub git_host: String,

    /// Access token for cloning
    #[arg(long, env = "WORKBAY_GIT_TOKEN", default_value = "", hide_env_values = true)]
    pub git_token: String,

    /// Per-repository clone timeout
    #[arg(long, default_value_t = 120)]
    pub clone_timeout_secs: u64,

    /// Maximum agent turn budget per session
    #[arg(long, default_value_t = 100)]
    pub max_turns: u32,

    /// How long an aborted session waits for the engine to stop
    #[arg(long, default_value_t = 5)]
    pub engine_grace_secs: u64,
}

impl Cli {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".workbay")
        })
    }

    pub fn work_root(&self) -> PathBuf {
        self.work_root
            .clone()
            .unwrap_or_else(|| self.data_dir().join("work"))
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn engine_grace(&self) -> Duration {
        Duration::from_secs(self.engine_grace_secs)
    }

    /// Split the engine command into program + args
    pub fn engine_command(&self) -> (String, Vec<String>) {
        let mut parts = self.engine_cmd.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "workbay-agent".to_string());
        (program, parts.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_command_splits_program_and_args() {
        let cli = Cli::parse_from(["workbay", "--engine-cmd", "claude --output ndjson"]);
        let (program, args) = cli.engine_command();
        assert_eq!(program, "claude");
        assert_eq!(args, vec!["--output".to_string(), "ndjson".to_string()]);
    }

    #[test]
    fn work_root_defaults_under_data_dir() {
        let cli = Cli::parse_from(["workbay", "--data-dir", "/srv/workbay"]);
        assert_eq!(cli.work_root(), PathBuf::from("/srv/workbay/work"));
    }
}
