// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Lifecycle
//!
//! ```text
//! Created --start--> Started --run--> Running --stop--> Stopping --> Stopped
//! ```
//!
//! - **start**: the master registers its session with the node; a worker
//!   tells the master it has started.
//! - **stop**: the mailbox closes, the agent that owns the process waits for
//!   its in-process children, then a worker reports `Stopped` and
//!   unregisters while the master kills the whole session.
//!
//! `Stopped` is terminal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use visor_core::domain::message::{system_types, Message};
use visor_core::domain::session::{AgentId, SessionId, SessionInfo, MASTER_AGENT_ID};

use crate::bootstrap::AgentBootstrap;
use crate::client::NodeConnection;
use crate::error::{Result, SdkError};
use crate::factory::WorkerFactory;
use crate::host::{AgentEntry, AgentHost};
use crate::mailbox::AgentMailbox;

/// Longest wait for in-process children when stopping.
pub const CHILD_DRAIN_LIMIT: Duration = Duration::from_secs(20 * 60);
const CHILD_DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Created,
    Started,
    Running,
    Stopping,
    Stopped,
}

pub struct Agent {
    bootstrap: AgentBootstrap,
    host: Arc<AgentHost>,
    mailbox: Arc<AgentMailbox>,
    workers: Option<WorkerFactory>,
    owns_host: bool,
    state: Mutex<AgentState>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("session_id", &self.session_id())
            .field("agent_id", &self.agent_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Agent {
    /// Agent living in `host`. `owns_host` marks the agent the process was
    /// started for; it waits for the others when stopping.
    pub fn new(bootstrap: AgentBootstrap, host: Arc<AgentHost>, owns_host: bool) -> Arc<Self> {
        let mailbox = host.open_mailbox(bootstrap.agent_id);
        let workers = bootstrap.is_master().then(|| {
            WorkerFactory::new(bootstrap.session.clone(), host.node().clone(), host.executable())
        });
        Arc::new(Self {
            bootstrap,
            host,
            mailbox,
            workers,
            owns_host,
            state: Mutex::new(AgentState::Created),
        })
    }

    pub fn session(&self) -> &SessionInfo {
        &self.bootstrap.session
    }

    pub fn session_id(&self) -> SessionId {
        self.bootstrap.session.session_id
    }

    pub fn agent_id(&self) -> AgentId {
        self.bootstrap.agent_id
    }

    pub fn is_master(&self) -> bool {
        self.bootstrap.is_master()
    }

    pub fn args(&self) -> &[String] {
        &self.bootstrap.args
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn mailbox(&self) -> &Arc<AgentMailbox> {
        &self.mailbox
    }

    pub fn host(&self) -> &Arc<AgentHost> {
        &self.host
    }

    fn node(&self) -> &Arc<dyn NodeConnection> {
        self.host.node()
    }

    /// Spawning is reserved to the master.
    pub fn workers(&self) -> Result<&WorkerFactory> {
        self.workers.as_ref().ok_or(SdkError::NotMaster)
    }

    pub async fn send(&self, to_id: AgentId, message_type: i32, content: Value) -> Result<bool> {
        let message = Message::new(self.session_id(), self.agent_id(), to_id, message_type, content);
        self.node().send(&message).await
    }

    /// Every other agent of the session.
    pub async fn broadcast(&self, message_type: i32, content: Value) -> Result<bool> {
        let message = Message::broadcast(self.session_id(), self.agent_id(), message_type, content);
        self.node().broadcast(&message).await
    }

    pub async fn running_agents(&self) -> Result<Vec<AgentId>> {
        self.node().running_agents(self.session_id()).await
    }

    /// End the session on every node. Master only.
    pub async fn kill_session(&self) -> Result<()> {
        if !self.is_master() {
            return Err(SdkError::NotMaster);
        }
        self.node().kill_session(self.session_id()).await
    }

    /// Announce the agent. Only valid from `Created`.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.state.lock();
            if *state != AgentState::Created {
                debug!(agent_id = self.agent_id(), state = ?*state, "Agent already started");
                return Ok(());
            }
        }
        if self.is_master() {
            self.node().register_master_agent(self.session()).await?;
        } else {
            self.send(MASTER_AGENT_ID, system_types::STARTED, Value::Null).await?;
        }
        *self.state.lock() = AgentState::Started;
        info!(session_id = %self.session_id(), agent_id = self.agent_id(), "Agent started");
        Ok(())
    }

    /// Leave the session. Repeated calls are no-ops.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if matches!(*state, AgentState::Stopping | AgentState::Stopped) {
                return Ok(());
            }
            *state = AgentState::Stopping;
        }
        self.mailbox.set_accepting(false);
        if self.owns_host {
            self.wait_for_children().await;
        }

        let outcome = if self.is_master() {
            self.node().kill_session(self.session_id()).await
        } else {
            if let Err(e) = self.send(MASTER_AGENT_ID, system_types::STOPPED, Value::Null).await {
                warn!(agent_id = self.agent_id(), error = %e, "Failed to report stop to master");
            }
            self.node().unregister_agent(self.session_id(), self.agent_id()).await
        };

        self.host.close_mailbox(self.agent_id());
        *self.state.lock() = AgentState::Stopped;
        info!(session_id = %self.session_id(), agent_id = self.agent_id(), "Agent stopped");
        outcome
    }

    async fn wait_for_children(&self) {
        let deadline = Instant::now() + CHILD_DRAIN_LIMIT;
        loop {
            let remaining = self.host.child_agent_count();
            if remaining == 0 {
                return;
            }
            if Instant::now() >= deadline {
                warn!(agent_id = self.agent_id(), remaining, "In-process agents still running, stopping anyway");
                return;
            }
            tokio::time::sleep(CHILD_DRAIN_POLL).await;
        }
    }

    /// Start, run `entry` to completion, then stop. An entry failure is
    /// reported to the master as `Aborted` before stopping.
    pub async fn run(self: Arc<Self>, entry: AgentEntry) -> anyhow::Result<()> {
        self.start().await?;
        *self.state.lock() = AgentState::Running;

        let result = entry(self.clone()).await;
        if let Err(e) = &result {
            error!(session_id = %self.session_id(), agent_id = self.agent_id(), error = %e, "Agent failed");
            if !self.is_master() {
                let text = Value::String(format!("{e:#}"));
                if let Err(send_err) = self.send(MASTER_AGENT_ID, system_types::ABORTED, text).await {
                    warn!(agent_id = self.agent_id(), error = %send_err, "Failed to report abort to master");
                }
            }
        }

        let stopped = self.stop().await;
        result?;
        stopped?;
        Ok(())
    }
}
