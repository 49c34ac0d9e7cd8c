// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OS process hosting for the first agent of a session on a node.
//!
//! The child learns who it is from three environment values read explicitly
//! by the SDK entry point: [`ENV_SESSION_ID`], [`ENV_AGENT_ID`] and
//! [`ENV_NODE_URL`].

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::domain::runtime::{AgentLauncher, AgentProcess, LaunchSpec, RuntimeError};

pub const ENV_SESSION_ID: &str = "VISOR_SESSION_ID";
pub const ENV_AGENT_ID: &str = "VISOR_AGENT_ID";
pub const ENV_NODE_URL: &str = "VISOR_NODE_URL";

#[derive(Debug, Default, Clone)]
pub struct TokioProcessLauncher {
    inherit_stdio: bool,
}

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let agent processes write to the daemon's stdout/stderr instead of
    /// discarding their output.
    pub fn with_inherited_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }

    fn command(&self, spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(spec.program());
        cmd.args(&spec.args)
            .env(ENV_SESSION_ID, spec.session_id.to_string())
            .env(ENV_AGENT_ID, spec.agent_id.to_string())
            .env(ENV_NODE_URL, &spec.node_url)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if spec.working_dir.is_dir() {
            cmd.current_dir(&spec.working_dir);
        }
        if !self.inherit_stdio {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd
    }
}

#[async_trait]
impl AgentLauncher for TokioProcessLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn AgentProcess>, RuntimeError> {
        let program = spec.program();
        let child = self
            .command(&spec)
            .spawn()
            .map_err(|e| RuntimeError::LaunchFailed(format!("{}: {}", program.display(), e)))?;
        info!(
            session_id = %spec.session_id,
            agent_id = spec.agent_id,
            program = %program.display(),
            pid = ?child.id(),
            "Agent process started"
        );
        Ok(Box::new(TokioAgentProcess { child }))
    }
}

#[derive(Debug)]
pub struct TokioAgentProcess {
    child: Child,
}

#[async_trait]
impl AgentProcess for TokioAgentProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn kill_and_wait(&mut self) -> Result<(), RuntimeError> {
        if self.has_exited() {
            debug!("Agent process already exited");
            return Ok(());
        }
        // `kill` sends SIGKILL and reaps the child.
        self.child
            .kill()
            .await
            .map_err(|e| RuntimeError::TerminationFailed(e.to_string()))
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::session::SessionId;
    use std::path::PathBuf;

    fn spec(executable: &str, args: &[&str], dir: PathBuf) -> LaunchSpec {
        LaunchSpec {
            session_id: SessionId::new(),
            agent_id: 1,
            executable: executable.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: dir,
            node_url: "http://127.0.0.1:8700".to_string(),
        }
    }

    #[tokio::test]
    async fn test_kill_long_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = TokioProcessLauncher::new();
        let mut process = launcher
            .launch(spec("/bin/sleep", &["30"], dir.path().to_path_buf()))
            .await
            .unwrap();

        assert!(process.id().is_some());
        assert!(!process.has_exited());
        process.kill_and_wait().await.unwrap();
        assert!(process.has_exited());
        // Second kill is harmless.
        process.kill_and_wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_environment_is_passed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");
        let script = format!("echo $VISOR_AGENT_ID $VISOR_NODE_URL > {}", out.display());
        let launcher = TokioProcessLauncher::new();
        let mut process = launcher
            .launch(spec("/bin/sh", &["-c", &script], dir.path().to_path_buf()))
            .await
            .unwrap();

        for _ in 0..100 {
            if process.has_exited() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let written = std::fs::read_to_string(out).unwrap();
        assert_eq!(written.trim(), "1 http://127.0.0.1:8700");
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_launch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = TokioProcessLauncher::new();
        let result = launcher.launch(spec("no-such-agent", &[], dir.path().to_path_buf())).await;
        assert!(matches!(result, Err(RuntimeError::LaunchFailed(_))));
    }
}
