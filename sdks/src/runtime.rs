// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Entry point of an agent process talking to a node daemon.
//!
//! ```no_run
//! use visor_sdk::AgentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     AgentRuntime::from_env()?
//!         .run(|agent| async move {
//!             if agent.is_master() {
//!                 agent.workers()?.spawn_one_per_node(vec![]).await?;
//!             }
//!             Ok(())
//!         })
//!         .await
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use visor_core::domain::message::{system_types, Message};
use visor_core::domain::session::MASTER_AGENT_ID;

use crate::agent::Agent;
use crate::bootstrap::{process_name, AgentBootstrap};
use crate::client::{NodeClient, NodeConnection};
use crate::host::{entry, AgentEntry, AgentHost};
use crate::log_buffer::LogBuffer;

pub const DEFAULT_HOST_BIND: &str = "127.0.0.1:0";

pub struct AgentRuntime {
    bootstrap: AgentBootstrap,
    executable: String,
    node: Option<Arc<dyn NodeConnection>>,
    entries: Vec<(String, AgentEntry)>,
    log: LogBuffer,
    bind: String,
    shuttle_logs: bool,
}

impl AgentRuntime {
    /// Runtime for the identity found in the process environment.
    pub fn from_env() -> crate::error::Result<Self> {
        Ok(Self::new(AgentBootstrap::from_env()?))
    }

    pub fn new(bootstrap: AgentBootstrap) -> Self {
        Self {
            bootstrap,
            executable: process_name(),
            node: None,
            entries: Vec::new(),
            log: LogBuffer::default(),
            bind: DEFAULT_HOST_BIND.to_string(),
            shuttle_logs: false,
        }
    }

    /// Name under which this process's entry is spawned again as a worker.
    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Use `node` instead of an HTTP client for the bootstrap node URL.
    pub fn with_node(mut self, node: Arc<dyn NodeConnection>) -> Self {
        self.node = Some(node);
        self
    }

    /// Extra entry that in-process spawns may ask for by name.
    pub fn with_entry(mut self, executable: impl Into<String>, entry: AgentEntry) -> Self {
        self.entries.push((executable.into(), entry));
        self
    }

    /// Buffer served to the node's log reads. Install it as a subscriber
    /// layer with [`crate::log_buffer::init_agent_logging`].
    pub fn with_log_buffer(mut self, log: LogBuffer) -> Self {
        self.log = log;
        self
    }

    pub fn with_bind_address(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Forward this worker's INFO and more severe log lines to the master.
    pub fn with_log_shuttle(mut self, enabled: bool) -> Self {
        self.shuttle_logs = enabled;
        self
    }

    pub fn bootstrap(&self) -> &AgentBootstrap {
        &self.bootstrap
    }

    /// Serve the agent host, attach it to the node, then run `main` through
    /// the whole agent lifecycle.
    pub async fn run<F, Fut>(self, main: F) -> anyhow::Result<()>
    where
        F: Fn(Arc<Agent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let bootstrap = self.bootstrap;
        let session_id = bootstrap.session.session_id;
        let agent_id = bootstrap.agent_id;
        let node = match self.node {
            Some(node) => node,
            None => Arc::new(NodeClient::new(bootstrap.node_url.clone())),
        };

        let host = AgentHost::new(bootstrap.clone(), node.clone(), self.executable.clone(), self.log.clone());
        let main = entry(main);
        host.register_entry(self.executable.clone(), main.clone());
        for (name, extra) in self.entries {
            host.register_entry(name, extra);
        }

        let url = host.serve(&self.bind).await.context("failed to serve agent host")?;
        node.attach_agent(session_id, agent_id, &url)
            .await
            .context("failed to attach agent host to node")?;
        info!(session_id = %session_id, agent_id, url = %url, "Agent process ready");

        if self.shuttle_logs && !bootstrap.is_master() {
            start_log_shuttle(&self.log, &bootstrap, node.clone());
        }

        let result = Agent::new(bootstrap, host, true).run(main).await;
        self.log.clear_shuttle();
        result
    }
}

fn start_log_shuttle(log: &LogBuffer, bootstrap: &AgentBootstrap, node: Arc<dyn NodeConnection>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    log.set_shuttle(tx);
    let session_id = bootstrap.session.session_id;
    let agent_id = bootstrap.agent_id;
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let message = Message::new(
                session_id,
                agent_id,
                MASTER_AGENT_ID,
                system_types::LOG_SHUTTLE,
                Value::String(line),
            );
            if node.send(&message).await.is_err() {
                break;
            }
        }
        debug!(agent_id, "Log shuttle closed");
    });
}
