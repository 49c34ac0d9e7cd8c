// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::session::{AgentId, SessionId};

/// Everything needed to start the first agent process of a session on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub session_id: SessionId,
    pub agent_id: AgentId,
    /// Executable, resolved against `working_dir` when relative.
    pub executable: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Base URL of the hosting node, handed to the agent for its callbacks.
    pub node_url: String,
}

impl LaunchSpec {
    pub fn program(&self) -> PathBuf {
        self.working_dir.join(&self.executable)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to launch agent process: {0}")]
    LaunchFailed(String),
    #[error("Failed to terminate agent process: {0}")]
    TerminationFailed(String),
    #[error("Failed to spawn agent in process: {0}")]
    InProcessSpawnFailed(String),
    #[error("No agent process is running for session {0}")]
    NoHostProcess(SessionId),
}

/// Handle on an OS process owned by a session portfolio.
#[async_trait]
pub trait AgentProcess: Send + Sync + std::fmt::Debug {
    /// OS process id, when still known.
    fn id(&self) -> Option<u32>;

    /// Force-terminate and block until the process has exited.
    async fn kill_and_wait(&mut self) -> Result<(), RuntimeError>;

    fn has_exited(&mut self) -> bool;
}

#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn AgentProcess>, RuntimeError>;
}
