// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Visor
//!
//! The per-node orchestrator service. Explicitly constructed by the process's
//! composition root and started/stopped by it; there is no global instance.
//!
//! It exposes two call surfaces, both thin over the services it owns:
//!
//! - cluster operations, called by other nodes;
//! - local operations, called by agents hosted on this node.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::membership::ClusterMembershipRegistry;
use crate::application::message_router::MessageRouter;
use crate::application::portfolio_store::{SessionPortfolioStore, SessionSummary};
use crate::application::spawn_scheduler::SpawnScheduler;
use crate::domain::cluster::{ClusterNode, NodeAddress};
use crate::domain::message::Message;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::repository::ClusterRegistryStore;
use crate::domain::runtime::AgentLauncher;
use crate::domain::session::{AgentId, SessionId, SessionInfo, BROADCAST_AGENT_ID, MASTER_AGENT_ID};
use crate::domain::spawn::SpawnRequest;
use crate::domain::transport::{AgentClient, ClusterClient};
use crate::infrastructure::package::PackageDeployer;

/// How long `stop` waits for the workers to finish their current item.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub self_node: ClusterNode,
    pub seeds: Vec<NodeAddress>,
    pub apps_dir: PathBuf,
    pub notify_timeout: Duration,
    /// Base URL agents started here use to call back into the node.
    pub node_url: String,
}

pub struct NodeDependencies {
    pub registry_store: Arc<dyn ClusterRegistryStore>,
    pub cluster: Arc<dyn ClusterClient>,
    pub agents: Arc<dyn AgentClient>,
    pub launcher: Arc<dyn AgentLauncher>,
}

/// Read-only snapshot for management tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementInfo {
    pub node: ClusterNode,
    pub started_at: DateTime<Utc>,
    pub nodes: Vec<ClusterNode>,
    pub sessions: Vec<SessionSummary>,
}

pub struct NodeVisor {
    membership: Arc<ClusterMembershipRegistry>,
    portfolios: Arc<SessionPortfolioStore>,
    scheduler: Arc<SpawnScheduler>,
    router: Arc<MessageRouter>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

impl NodeVisor {
    pub fn new(settings: NodeSettings, deps: NodeDependencies) -> Self {
        let membership = Arc::new(ClusterMembershipRegistry::new(
            settings.self_node,
            settings.seeds,
            deps.registry_store,
            deps.cluster.clone(),
            settings.notify_timeout,
        ));
        let portfolios = Arc::new(SessionPortfolioStore::new(membership.clone(), deps.cluster.clone()));
        let scheduler = Arc::new(SpawnScheduler::new(
            portfolios.clone(),
            membership.clone(),
            deps.cluster.clone(),
            deps.agents.clone(),
            deps.launcher,
            PackageDeployer::new(settings.apps_dir),
            settings.node_url,
            settings.notify_timeout,
        ));
        let router = Arc::new(MessageRouter::new(
            portfolios.clone(),
            membership.clone(),
            deps.cluster,
            deps.agents,
        ));
        Self {
            membership,
            portfolios,
            scheduler,
            router,
            workers: Mutex::new(Vec::new()),
            started_at: Utc::now(),
        }
    }

    pub fn address(&self) -> &NodeAddress {
        self.membership.self_address()
    }

    /// Join the cluster and start the spawn and routing workers.
    pub async fn start(&self) {
        self.membership.register_instance().await;
        let mut workers = self.workers.lock();
        workers.push(self.scheduler.start());
        workers.push(self.router.start());
        info!(node = %self.address(), "Node visor started");
    }

    /// Stop taking work, leave the cluster and release the workers.
    pub async fn stop(&self) {
        self.scheduler.stop();
        self.router.stop();
        self.membership.unregister_instance().await;

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let abort = worker.abort_handle();
            if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker).await.is_err() {
                warn!("Worker did not stop in time, aborting it");
                abort.abort();
            }
        }
        info!(node = %self.address(), "Node visor stopped");
    }

    // ---- cluster operations (node to node) ----

    pub fn directed_spawn_request(&self, request: SpawnRequest) -> bool {
        self.scheduler.enqueue(request)
    }

    pub fn register_agent(&self, session: &SessionInfo, agent_id: AgentId, node: NodeAddress) {
        self.portfolios.register_agent(session, agent_id, node);
    }

    pub fn unregister_agent(&self, session_id: SessionId, agent_id: AgentId) {
        self.portfolios.unregister_agent(session_id, agent_id);
    }

    pub async fn register_cluster_node(&self, info: ClusterNode) {
        self.membership.register_node(info).await;
    }

    pub async fn unregister_cluster_node(&self, info: ClusterNode) {
        self.membership.unregister_node(info).await;
    }

    pub async fn list_nodes(&self) -> Vec<ClusterNode> {
        self.membership.list_nodes().await
    }

    pub fn relay_message(&self, message: Message) -> bool {
        self.router.enqueue(message)
    }

    /// Session teardown requested by another node; not fanned out again.
    pub async fn kill_session_local(&self, session_id: SessionId) {
        self.portfolios.kill_session_local(session_id).await;
    }

    // ---- local operations (agent to node) ----

    pub fn ping(&self, echo: i32) -> i32 {
        echo
    }

    /// Ask for `count` workers dealt round-robin over the cluster.
    pub fn spawn(
        &self,
        session: SessionInfo,
        count: u16,
        executable: String,
        package: Option<Vec<u8>>,
        args: Vec<String>,
    ) -> bool {
        self.spawn_with_strategy(session, count, executable, package, args, 0, 0.0)
    }

    /// Ask for workers sized per node by `strategy` (0 = plain count).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_with_strategy(
        &self,
        session: SessionInfo,
        count: u16,
        executable: String,
        package: Option<Vec<u8>>,
        args: Vec<String>,
        strategy: i32,
        factor: f64,
    ) -> bool {
        // Agent ids are assigned when the scheduler plans the ask.
        let request = SpawnRequest::new(session, count, executable, package, args).with_strategy(strategy, factor);
        self.scheduler.enqueue(request)
    }

    pub fn send(&self, message: Message) -> bool {
        self.router.enqueue(message)
    }

    pub fn broadcast(&self, mut message: Message) -> bool {
        message.to_id = BROADCAST_AGENT_ID;
        self.router.enqueue(message)
    }

    pub async fn register_master_agent(&self, session: &SessionInfo) {
        self.portfolios.register_master_agent(session).await;
    }

    /// A local agent is leaving. The master leaving ends the whole session.
    pub async fn unregister_local_agent(&self, session_id: SessionId, agent_id: AgentId) {
        if agent_id == MASTER_AGENT_ID {
            self.kill_session(session_id).await;
        } else {
            self.portfolios.unregister_local_agent(session_id, agent_id).await;
        }
    }

    pub fn running_agents(&self, session_id: SessionId) -> Vec<AgentId> {
        self.portfolios.running_agents(session_id)
    }

    pub async fn kill_session(&self, session_id: SessionId) {
        self.portfolios.kill_session(session_id).await;
    }

    pub async fn management_info(&self) -> ManagementInfo {
        ManagementInfo {
            node: self.membership.self_node().clone(),
            started_at: self.started_at,
            nodes: self.membership.list_nodes().await,
            sessions: self.portfolios.summaries(),
        }
    }

    pub fn portfolio_snapshot(&self, session_id: SessionId) -> Option<PortfolioSnapshot> {
        self.portfolios.snapshot(session_id)
    }
}
