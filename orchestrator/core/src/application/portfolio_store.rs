// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Portfolio Store
//!
//! One [`SessionPortfolio`] per live session on this node, behind its own lock.
//! Nothing here awaits while holding that lock: process teardown and peer
//! notifications happen after the critical section.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::fanout;
use crate::application::membership::ClusterMembershipRegistry;
use crate::domain::cluster::NodeAddress;
use crate::domain::portfolio::{AgentLocation, PortfolioSnapshot, SessionPortfolio};
use crate::domain::runtime::AgentProcess;
use crate::domain::session::{AgentId, AgentName, SessionId, SessionInfo, MASTER_AGENT_ID};
use crate::domain::transport::ClusterClient;

/// Where a unicast message has to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Local(AgentName),
    Remote(NodeAddress),
}

/// Local side of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastScope {
    pub sender_is_local: bool,
    /// Every locally hosted agent except the sender.
    pub local_targets: Vec<AgentName>,
}

/// How the next agent of a session can be started on this node.
#[derive(Debug, Clone)]
pub struct SpawnSite {
    pub host: Option<AgentName>,
    pub has_process: bool,
    pub deployment: Option<PathBuf>,
}

/// Per-session agent counts for management views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub process_name: String,
    pub local_agents: usize,
    pub agents_per_node: BTreeMap<NodeAddress, usize>,
}

pub struct SessionPortfolioStore {
    portfolios: Mutex<HashMap<SessionId, SessionPortfolio>>,
    /// Highest agent id handed out to a spawn plan, per session.
    reserved: Mutex<HashMap<SessionId, AgentId>>,
    membership: Arc<ClusterMembershipRegistry>,
    cluster: Arc<dyn ClusterClient>,
}

impl SessionPortfolioStore {
    pub fn new(membership: Arc<ClusterMembershipRegistry>, cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            portfolios: Mutex::new(HashMap::new()),
            reserved: Mutex::new(HashMap::new()),
            membership,
            cluster,
        }
    }

    fn self_address(&self) -> &NodeAddress {
        self.membership.self_address()
    }

    /// Record that `agent_id` lives on `node`. Creates the portfolio if absent.
    pub fn register_agent(&self, session: &SessionInfo, agent_id: AgentId, node: NodeAddress) {
        let local = &node == self.self_address();
        let location = AgentLocation::new(session.clone(), agent_id, node);
        let mut portfolios = self.portfolios.lock();
        let portfolio = portfolios
            .entry(session.session_id)
            .or_insert_with(|| SessionPortfolio::new(session.clone()));
        let recorded = if local {
            portfolio.register_local(location)
        } else {
            portfolio.register(location)
        };
        if !recorded {
            warn!(session_id = %session.session_id, agent_id, "Refusing to register broadcast id as an agent");
        } else {
            debug!(session_id = %session.session_id, agent_id, local, "Agent registered");
        }
    }

    /// Register the local master (agent 0) and announce it to every active peer.
    pub async fn register_master_agent(&self, session: &SessionInfo) {
        {
            let mut portfolios = self.portfolios.lock();
            let portfolio = portfolios
                .entry(session.session_id)
                .or_insert_with(|| SessionPortfolio::new(session.clone()));
            portfolio.register_local(AgentLocation::new(
                session.clone(),
                MASTER_AGENT_ID,
                self.self_address().clone(),
            ));
            portfolio.set_host(AgentName::new(MASTER_AGENT_ID, session.session_id));
        }
        info!(session_id = %session.session_id, process = %session.process_name, "Master agent registered");

        let peers = self.membership.active_peers().await;
        let cluster = self.cluster.clone();
        let session = session.clone();
        let me = self.self_address().clone();
        fanout::notify_each(peers, "register_master_agent", move |peer| {
            let cluster = cluster.clone();
            let session = session.clone();
            let me = me.clone();
            async move { cluster.register_agent(&peer, &session, MASTER_AGENT_ID, &me).await }
        });
    }

    /// Forget an agent. A portfolio left with nothing in it is dropped.
    pub fn unregister_agent(&self, session_id: SessionId, agent_id: AgentId) -> bool {
        let mut portfolios = self.portfolios.lock();
        let Some(portfolio) = portfolios.get_mut(&session_id) else {
            return false;
        };
        let known = portfolio.unregister(agent_id);
        if portfolio.is_vacant() {
            portfolios.remove(&session_id);
            self.reserved.lock().remove(&session_id);
        }
        debug!(session_id = %session_id, agent_id, known, "Agent unregistered");
        known
    }

    /// Unregister a local agent here and on every active peer.
    pub async fn unregister_local_agent(&self, session_id: SessionId, agent_id: AgentId) {
        self.unregister_agent(session_id, agent_id);

        let peers = self.membership.active_peers().await;
        let cluster = self.cluster.clone();
        fanout::notify_each(peers, "unregister_agent", move |peer| {
            let cluster = cluster.clone();
            async move { cluster.unregister_agent(&peer, session_id, agent_id).await }
        });
    }

    /// Tear the session down on this node only. Idempotent.
    pub async fn kill_session_local(&self, session_id: SessionId) {
        self.reserved.lock().remove(&session_id);
        let removed = self.portfolios.lock().remove(&session_id);
        let Some(mut portfolio) = removed else {
            debug!(session_id = %session_id, "Kill requested for unknown session");
            return;
        };

        if let Some(mut process) = portfolio.take_process() {
            info!(session_id = %session_id, pid = ?process.id(), "Terminating session process");
            if let Err(e) = process.kill_and_wait().await {
                warn!(session_id = %session_id, error = %e, "Failed to terminate session process");
            }
        }

        if let Some(dir) = portfolio.deployment() {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                warn!(session_id = %session_id, dir = %dir.display(), error = %e, "Failed to remove session deployment");
            }
        }

        metrics::counter!("visor_sessions_killed_total").increment(1);
        info!(session_id = %session_id, "Session killed on this node");
    }

    /// Tear the session down across the cluster: notify every active peer, then
    /// kill it here.
    pub async fn kill_session(&self, session_id: SessionId) {
        let peers = self.membership.active_peers().await;
        let cluster = self.cluster.clone();
        fanout::notify_each(peers, "kill_session", move |peer| {
            let cluster = cluster.clone();
            async move { cluster.kill_session(&peer, session_id).await }
        });
        self.kill_session_local(session_id).await;
    }

    /// Every agent id known for the session, ascending.
    pub fn running_agents(&self, session_id: SessionId) -> Vec<AgentId> {
        self.portfolios
            .lock()
            .get(&session_id)
            .map(|p| p.locations().map(|l| l.agent_id).collect())
            .unwrap_or_default()
    }

    /// Offset for the next spawn plan of the session: past every known agent
    /// and every id already handed out.
    pub fn next_spawn_offset(&self, session_id: SessionId) -> AgentId {
        let known = self.running_agents(session_id).last().copied().unwrap_or(MASTER_AGENT_ID);
        let reserved = self.reserved.lock().get(&session_id).copied().unwrap_or(MASTER_AGENT_ID);
        known.max(reserved)
    }

    /// Mark every id up to `last` as handed out.
    pub fn reserve_agent_ids(&self, session_id: SessionId, last: AgentId) {
        let mut reserved = self.reserved.lock();
        let entry = reserved.entry(session_id).or_insert(MASTER_AGENT_ID);
        *entry = (*entry).max(last);
    }

    pub fn is_local_agent(&self, session_id: SessionId, agent_id: AgentId) -> bool {
        self.portfolios
            .lock()
            .get(&session_id)
            .is_some_and(|p| p.is_local(agent_id))
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.portfolios.lock().contains_key(&session_id)
    }

    /// Resolve a unicast destination. `None` when the session or agent is unknown.
    pub fn route(&self, session_id: SessionId, to_id: AgentId) -> Option<Route> {
        let portfolios = self.portfolios.lock();
        let portfolio = portfolios.get(&session_id)?;
        if portfolio.is_local(to_id) {
            return Some(Route::Local(AgentName::new(to_id, session_id)));
        }
        portfolio.location(to_id).map(|l| Route::Remote(l.node.clone()))
    }

    /// Local fan-out set of a broadcast from `from_id`. `None` for unknown sessions.
    pub fn broadcast_scope(&self, session_id: SessionId, from_id: AgentId) -> Option<BroadcastScope> {
        let portfolios = self.portfolios.lock();
        let portfolio = portfolios.get(&session_id)?;
        Some(BroadcastScope {
            sender_is_local: portfolio.is_local(from_id),
            local_targets: portfolio
                .local_ids()
                .filter(|&id| id != from_id)
                .map(|id| AgentName::new(id, session_id))
                .collect(),
        })
    }

    /// Ensure a portfolio exists and report how the next local agent can start.
    pub fn spawn_site(&self, session: &SessionInfo) -> SpawnSite {
        let mut portfolios = self.portfolios.lock();
        let portfolio = portfolios
            .entry(session.session_id)
            .or_insert_with(|| SessionPortfolio::new(session.clone()));
        SpawnSite {
            host: portfolio.host().cloned(),
            has_process: portfolio.has_process(),
            deployment: portfolio.deployment().map(PathBuf::from),
        }
    }

    /// Record the session's deployment directory. False when the session was
    /// killed meanwhile; the directory is then the caller's to remove.
    pub fn mark_deployed(&self, session_id: SessionId, dir: PathBuf) -> bool {
        match self.portfolios.lock().get_mut(&session_id) {
            Some(portfolio) => {
                portfolio.set_deployment(dir);
                true
            }
            None => false,
        }
    }

    /// Hand a freshly launched process to its session. If the session was
    /// killed while the process was starting, the process is handed back so the
    /// caller can terminate it.
    pub fn attach_process(
        &self,
        session_id: SessionId,
        process: Box<dyn AgentProcess>,
        host: AgentName,
    ) -> Result<(), Box<dyn AgentProcess>> {
        match self.portfolios.lock().get_mut(&session_id) {
            Some(portfolio) => {
                portfolio.attach_process(process, host);
                Ok(())
            }
            None => Err(process),
        }
    }

    /// Record a newly started local agent. False when the session is gone.
    pub fn record_local_agent(&self, session: &SessionInfo, agent_id: AgentId) -> bool {
        let location = AgentLocation::new(session.clone(), agent_id, self.self_address().clone());
        match self.portfolios.lock().get_mut(&session.session_id) {
            Some(portfolio) => portfolio.register_local(location),
            None => false,
        }
    }

    pub fn snapshot(&self, session_id: SessionId) -> Option<PortfolioSnapshot> {
        self.portfolios.lock().get(&session_id).map(SessionPortfolio::snapshot)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.portfolios.lock().keys().copied().collect()
    }

    /// Per-session agent counts per node, ordered by session id.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let portfolios = self.portfolios.lock();
        let mut summaries: Vec<SessionSummary> = portfolios
            .values()
            .map(|p| {
                let mut agents_per_node = BTreeMap::new();
                for location in p.locations() {
                    *agents_per_node.entry(location.node.clone()).or_insert(0) += 1;
                }
                SessionSummary {
                    session_id: p.session_id(),
                    process_name: p.session().process_name.clone(),
                    local_agents: p.local_ids().count(),
                    agents_per_node,
                }
            })
            .collect();
        summaries.sort_by_key(|s| s.session_id);
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{
        addr, eventually, membership, session, ClusterCall, FakeProcess, RecordingCluster,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn store(peers: &[&str]) -> (SessionPortfolioStore, Arc<RecordingCluster>) {
        let cluster = Arc::new(RecordingCluster::default());
        let registry = membership("self:1", peers, cluster.clone()).await;
        (SessionPortfolioStore::new(registry, cluster.clone()), cluster)
    }

    #[tokio::test]
    async fn test_register_then_unregister_restores_state() {
        let (store, _) = store(&[]).await;
        let s = session();

        assert_eq!(store.snapshot(s.session_id), None);
        store.register_agent(&s, 3, addr("peer:1"));
        store.unregister_agent(s.session_id, 3);
        assert_eq!(store.snapshot(s.session_id), None);

        store.register_agent(&s, 1, addr("self:1"));
        let before = store.snapshot(s.session_id);
        store.register_agent(&s, 7, addr("self:1"));
        store.register_agent(&s, 7, addr("self:1"));
        assert!(store.unregister_agent(s.session_id, 7));
        assert_eq!(store.snapshot(s.session_id), before);
    }

    #[tokio::test]
    async fn test_routes() {
        let (store, _) = store(&[]).await;
        let s = session();
        store.register_agent(&s, 1, addr("self:1"));
        store.register_agent(&s, 2, addr("peer:1"));

        assert_eq!(store.route(s.session_id, 1), Some(Route::Local(AgentName::new(1, s.session_id))));
        assert_eq!(store.route(s.session_id, 2), Some(Route::Remote(addr("peer:1"))));
        assert_eq!(store.route(s.session_id, 9), None);
        assert_eq!(store.route(SessionId::new(), 1), None);
    }

    #[tokio::test]
    async fn test_master_registration_is_announced() {
        let (store, cluster) = store(&["a:1", "b:1"]).await;
        let s = session();

        store.register_master_agent(&s).await;

        let snapshot = store.snapshot(s.session_id).unwrap();
        assert_eq!(snapshot.local_ids, vec![MASTER_AGENT_ID]);
        assert_eq!(snapshot.host, Some(AgentName::new(MASTER_AGENT_ID, s.session_id)));
        assert!(
            eventually(|| {
                cluster
                    .calls()
                    .iter()
                    .filter(|c| matches!(c, ClusterCall::RegisterAgent(_, sid, 0, at) if *sid == s.session_id && *at == addr("self:1")))
                    .count()
                    == 2
            })
            .await
        );
    }

    #[tokio::test]
    async fn test_kill_session_local_terminates_process_once() {
        let (store, _) = store(&[]).await;
        let s = session();
        let killed = Arc::new(AtomicBool::new(false));
        store.spawn_site(&s);
        store
            .attach_process(s.session_id, Box::new(FakeProcess { killed: killed.clone() }), AgentName::new(1, s.session_id))
            .unwrap();
        store.record_local_agent(&s, 1);

        store.kill_session_local(s.session_id).await;
        assert!(killed.load(Ordering::SeqCst));
        assert!(!store.contains(s.session_id));

        killed.store(false, Ordering::SeqCst);
        store.kill_session_local(s.session_id).await;
        assert!(!killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_kill_session_removes_deployment() {
        let (store, _) = store(&[]).await;
        let s = session();
        let dir = tempfile::tempdir().unwrap();
        let deployment = dir.path().join(format!("app-{}", s.session_id));
        std::fs::create_dir_all(&deployment).unwrap();
        store.spawn_site(&s);
        assert!(store.mark_deployed(s.session_id, deployment.clone()));

        store.kill_session_local(s.session_id).await;
        assert!(!deployment.exists());
        assert!(!store.mark_deployed(s.session_id, deployment));
    }

    #[tokio::test]
    async fn test_spawn_offset_skips_reserved_ids() {
        let (store, _) = store(&[]).await;
        let s = session();
        assert_eq!(store.next_spawn_offset(s.session_id), MASTER_AGENT_ID);

        store.register_master_agent(&s).await;
        store.reserve_agent_ids(s.session_id, 2);
        assert_eq!(store.next_spawn_offset(s.session_id), 2);

        // A lower reservation never moves the offset back.
        store.reserve_agent_ids(s.session_id, 1);
        store.register_agent(&s, 5, addr("peer:1"));
        assert_eq!(store.next_spawn_offset(s.session_id), 5);

        store.kill_session_local(s.session_id).await;
        assert_eq!(store.next_spawn_offset(s.session_id), MASTER_AGENT_ID);
    }

    #[tokio::test]
    async fn test_attach_to_killed_session_hands_process_back() {
        let (store, _) = store(&[]).await;
        let s = session();
        let result = store.attach_process(
            s.session_id,
            Box::new(FakeProcess { killed: Arc::new(AtomicBool::new(false)) }),
            AgentName::new(1, s.session_id),
        );
        assert!(result.is_err());
        assert!(!store.record_local_agent(&s, 1));
    }

    #[tokio::test]
    async fn test_kill_session_fans_out_to_active_peers() {
        let (store, cluster) = store(&["a:1", "b:1"]).await;
        let s = session();
        store.register_agent(&s, 1, addr("self:1"));

        store.kill_session(s.session_id).await;

        assert!(!store.contains(s.session_id));
        assert!(
            eventually(|| {
                let calls = cluster.calls();
                calls.contains(&ClusterCall::KillSession(addr("a:1"), s.session_id))
                    && calls.contains(&ClusterCall::KillSession(addr("b:1"), s.session_id))
            })
            .await
        );
    }

    #[tokio::test]
    async fn test_unregister_local_agent_notifies_peers() {
        let (store, cluster) = store(&["a:1"]).await;
        let s = session();
        store.register_agent(&s, 4, addr("self:1"));

        store.unregister_local_agent(s.session_id, 4).await;

        assert!(store.running_agents(s.session_id).is_empty());
        assert!(
            eventually(|| cluster
                .calls()
                .contains(&ClusterCall::UnregisterAgent(addr("a:1"), s.session_id, 4)))
            .await
        );
    }

    #[tokio::test]
    async fn test_running_agents_sorted_and_summaries() {
        let (store, _) = store(&[]).await;
        let s = session();
        for (id, node) in [(5, "self:1"), (2, "peer:1"), (0, "self:1")] {
            store.register_agent(&s, id, addr(node));
        }

        assert_eq!(store.running_agents(s.session_id), vec![0, 2, 5]);
        let summaries = store.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].local_agents, 2);
        assert_eq!(summaries[0].agents_per_node.get(&addr("peer:1")), Some(&1));
        assert_eq!(summaries[0].agents_per_node.get(&addr("self:1")), Some(&2));
    }
}
