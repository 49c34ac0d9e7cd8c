// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Single-process mode: one node and all agents of a session in this
//! process, connected through the loopback transport. Every worker runs
//! in-process inside the master's host.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use visor_core::application::{NodeDependencies, NodeSettings, NodeVisor};
use visor_core::domain::cluster::{ClusterNode, NodeAddress};
use visor_core::domain::runtime::{AgentLauncher, AgentProcess, LaunchSpec, RuntimeError};
use visor_core::domain::session::{AgentName, MASTER_AGENT_ID};
use visor_core::infrastructure::loopback::LoopbackCluster;
use visor_core::infrastructure::repositories::InMemoryClusterRegistryStore;

use crate::agent::Agent;
use crate::bootstrap::AgentBootstrap;
use crate::client::{InProcessNode, NodeConnection};
use crate::host::{entry, AgentHost};
use crate::log_buffer::LogBuffer;

pub const LOCAL_NODE_ADDRESS: &str = "localhost:1";
const LOCAL_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LocalCluster {
    node: Arc<NodeVisor>,
    loopback: Arc<LoopbackCluster>,
    log: LogBuffer,
}

impl LocalCluster {
    /// Start the in-process node. `processors` sizes the capacity strategies.
    pub async fn start(apps_dir: impl Into<PathBuf>, processors: u16) -> anyhow::Result<Self> {
        let address: NodeAddress = LOCAL_NODE_ADDRESS.parse().context("local node address")?;
        let loopback = LoopbackCluster::new();
        let node = Arc::new(NodeVisor::new(
            NodeSettings {
                self_node: ClusterNode::new(address, processors, "local"),
                seeds: Vec::new(),
                apps_dir: apps_dir.into(),
                notify_timeout: LOCAL_NOTIFY_TIMEOUT,
                node_url: "local".to_string(),
            },
            NodeDependencies {
                registry_store: Arc::new(InMemoryClusterRegistryStore::new()),
                cluster: loopback.clone(),
                agents: loopback.clone(),
                launcher: Arc::new(InProcessOnly),
            },
        ));
        loopback.attach_node(&node);
        node.start().await;
        Ok(Self {
            node,
            loopback,
            log: LogBuffer::default(),
        })
    }

    pub fn with_log_buffer(mut self, log: LogBuffer) -> Self {
        self.log = log;
        self
    }

    pub fn node(&self) -> &Arc<NodeVisor> {
        &self.node
    }

    pub fn connection(&self) -> Arc<dyn NodeConnection> {
        Arc::new(InProcessNode::new(self.node.clone()))
    }

    /// Run `main` as the master of a new session. Workers spawned through
    /// the master's factory run the same `main` under `executable`.
    pub async fn run<F, Fut>(&self, executable: &str, args: Vec<String>, main: F) -> anyhow::Result<()>
    where
        F: Fn(Arc<Agent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let bootstrap = AgentBootstrap::master(executable, &args, "local");
        let session_id = bootstrap.session.session_id;
        let host = AgentHost::new(bootstrap.clone(), self.connection(), executable, self.log.clone());
        let main = entry(main);
        host.register_entry(executable, main.clone());
        self.loopback.attach_agent(AgentName::new(MASTER_AGENT_ID, session_id), host.clone());
        info!(session_id = %session_id, executable, "Local session starting");

        let result = Agent::new(bootstrap, host, true).run(main).await;
        self.loopback.detach_session(session_id);
        result
    }

    pub async fn stop(&self) {
        self.node.stop().await;
    }
}

/// Local mode never starts OS processes: the master's host always exists.
struct InProcessOnly;

#[async_trait]
impl AgentLauncher for InProcessOnly {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn AgentProcess>, RuntimeError> {
        Err(RuntimeError::LaunchFailed(format!(
            "{} cannot be started as a process in local mode",
            spec.executable
        )))
    }
}
