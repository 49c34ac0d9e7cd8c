// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Spawn Scheduler
//!
//! Background worker draining the node's spawn queue.
//!
//! - An **original ask** is planned with [`plan_directives`] and every
//!   directive is sent to its node. Directives for this node go straight back
//!   onto the local queue.
//! - A **directive** starts one agent here: unpack the package once per
//!   session, then either launch the session's process or ask the running
//!   host process to start the agent in-process. The new agent is announced to
//!   every active peer.
//!
//! Each queued request is handled in isolation; nothing that goes wrong with
//! one request stops the worker.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::fanout;
use crate::application::membership::ClusterMembershipRegistry;
use crate::application::portfolio_store::SessionPortfolioStore;
use crate::application::work_queue::WorkQueue;
use crate::domain::cluster::NodeAddress;
use crate::domain::runtime::{AgentLauncher, LaunchSpec};
use crate::domain::session::{is_addressable, AgentId, AgentName, MASTER_AGENT_ID};
use crate::domain::spawn::{plan_directives, PlannedDirective, SpawnRequest};
use crate::domain::transport::{AgentClient, ClusterClient};
use crate::infrastructure::package::PackageDeployer;

pub struct SpawnScheduler {
    queue: WorkQueue<SpawnRequest>,
    portfolios: Arc<SessionPortfolioStore>,
    membership: Arc<ClusterMembershipRegistry>,
    cluster: Arc<dyn ClusterClient>,
    agents: Arc<dyn AgentClient>,
    launcher: Arc<dyn AgentLauncher>,
    deployer: PackageDeployer,
    node_url: String,
    notify_timeout: Duration,
}

impl SpawnScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        portfolios: Arc<SessionPortfolioStore>,
        membership: Arc<ClusterMembershipRegistry>,
        cluster: Arc<dyn ClusterClient>,
        agents: Arc<dyn AgentClient>,
        launcher: Arc<dyn AgentLauncher>,
        deployer: PackageDeployer,
        node_url: String,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            queue: WorkQueue::new(),
            portfolios,
            membership,
            cluster,
            agents,
            launcher,
            deployer,
            node_url,
            notify_timeout,
        }
    }

    /// Queue a request for the worker. False once the scheduler is stopped.
    pub fn enqueue(&self, request: SpawnRequest) -> bool {
        let accepted = self.queue.push(request);
        if !accepted {
            warn!("Spawn queue is closed, request dropped");
        }
        accepted
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    pub fn stop(&self) {
        self.queue.close();
    }

    async fn run(self: Arc<Self>) {
        debug!("Spawn scheduler started");
        while let Some(request) = self.queue.pop().await {
            let session_id = request.session.session_id;
            if AssertUnwindSafe(self.handle(request)).catch_unwind().await.is_err() {
                error!(session_id = %session_id, "Spawn request handler panicked");
            }
        }
        debug!("Spawn scheduler stopped");
    }

    pub async fn handle(&self, request: SpawnRequest) {
        if request.is_directive {
            self.spawn_directive(request).await;
        } else {
            self.fan_out(request).await;
        }
    }

    async fn fan_out(&self, mut request: SpawnRequest) {
        let session_id = request.session.session_id;
        let nodes = self.membership.list_nodes().await;
        let self_address = self.membership.self_address();
        // Asks are planned one at a time; ids handed out here are never reissued.
        request.offset = request.offset.max(self.portfolios.next_spawn_offset(session_id));
        let plan = plan_directives(&request, &nodes, self_address);
        if let Some(last) = plan.last() {
            self.portfolios.reserve_agent_ids(session_id, last.request.target_agent_id());
        }
        info!(
            session_id = %session_id,
            count = request.count,
            offset = request.offset,
            strategy = request.strategy,
            directives = plan.len(),
            "Distributing spawn request"
        );

        // Nodes that have acknowledged a directive. A node whose first
        // (packaged) directive failed gets the package on its next one.
        let mut reached: HashSet<NodeAddress> = HashSet::new();
        for PlannedDirective { node, request: mut directive } in plan {
            if directive.package.is_none() && !reached.contains(&node) {
                directive.package = request.package.clone();
            }
            let agent_id = directive.target_agent_id();
            let sent = if &node == self_address {
                self.queue.push(directive)
            } else {
                match self.cluster.directed_spawn(&node, &directive).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(node = %node, agent_id, error = %e, "Failed to send spawn directive");
                        false
                    }
                }
            };
            if sent {
                metrics::counter!("visor_spawn_directives_total").increment(1);
                reached.insert(node);
            }
        }
    }

    async fn spawn_directive(&self, request: SpawnRequest) {
        let session = &request.session;
        let session_id = session.session_id;
        let agent_id = request.target_agent_id();
        if agent_id == MASTER_AGENT_ID || !is_addressable(agent_id) {
            warn!(session_id = %session_id, agent_id, "Directive names a reserved agent id, dropped");
            return;
        }
        if self.portfolios.is_local_agent(session_id, agent_id) {
            warn!(session_id = %session_id, agent_id, "Directive names an agent already running here, dropped");
            return;
        }

        let site = self.portfolios.spawn_site(session);
        if site.deployment.is_none() {
            if let Some(package) = request.package.clone() {
                match self.deployer.unpack(session_id, package).await {
                    Ok(dir) => {
                        if !self.portfolios.mark_deployed(session_id, dir.clone()) {
                            warn!(session_id = %session_id, agent_id, "Session ended while package was unpacking");
                            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                                warn!(session_id = %session_id, dir = %dir.display(), error = %e, "Failed to remove session deployment");
                            }
                            return;
                        }
                    }
                    Err(e) => {
                        error!(session_id = %session_id, agent_id, error = %e, "Failed to unpack package");
                        return;
                    }
                }
            }
        }

        let started = match site.host {
            Some(host) => self.spawn_in_host(&host, agent_id, &request).await,
            None => self.launch_process(agent_id, &request).await,
        };
        if !started {
            return;
        }

        if !self.portfolios.record_local_agent(session, agent_id) {
            warn!(session_id = %session_id, agent_id, "Session ended while agent was starting");
            return;
        }
        metrics::counter!("visor_agents_spawned_total").increment(1);
        info!(session_id = %session_id, agent_id, "Agent spawned");

        self.announce(&request, agent_id).await;
    }

    async fn spawn_in_host(&self, host: &AgentName, agent_id: AgentId, request: &SpawnRequest) -> bool {
        match self
            .agents
            .spawn_in_process(host, agent_id, &request.executable, &request.args)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    session_id = %request.session.session_id,
                    agent_id,
                    host = %host,
                    error = %e,
                    "Host process refused in-process spawn"
                );
                false
            }
        }
    }

    async fn launch_process(&self, agent_id: AgentId, request: &SpawnRequest) -> bool {
        let session_id = request.session.session_id;
        if request.executable.trim().is_empty() {
            error!(session_id = %session_id, agent_id, "No process to host agent and no executable to launch");
            return false;
        }
        let spec = LaunchSpec {
            session_id,
            agent_id,
            executable: request.executable.clone(),
            args: request.args.clone(),
            working_dir: self.deployer.working_dir(session_id),
            node_url: self.node_url.clone(),
        };
        let process = match self.launcher.launch(spec).await {
            Ok(process) => process,
            Err(e) => {
                error!(session_id = %session_id, agent_id, error = %e, "Failed to launch agent process");
                return false;
            }
        };
        info!(session_id = %session_id, agent_id, pid = ?process.id(), "Launched agent process");

        match self
            .portfolios
            .attach_process(session_id, process, AgentName::new(agent_id, session_id))
        {
            Ok(()) => true,
            Err(mut orphan) => {
                warn!(session_id = %session_id, agent_id, "Session ended while process was starting, terminating it");
                if let Err(e) = orphan.kill_and_wait().await {
                    warn!(session_id = %session_id, error = %e, "Failed to terminate orphaned process");
                }
                false
            }
        }
    }

    /// Tell every active peer where the new agent lives, waiting at most the
    /// notify timeout for all of them.
    async fn announce(&self, request: &SpawnRequest, agent_id: AgentId) {
        let peers = self.membership.active_peers().await;
        let cluster = self.cluster.clone();
        let session = request.session.clone();
        let me = self.membership.self_address().clone();
        let handles = fanout::notify_each(peers, "register_agent", move |peer| {
            let cluster = cluster.clone();
            let session = session.clone();
            let me = me.clone();
            async move { cluster.register_agent(&peer, &session, agent_id, &me).await }
        });
        fanout::await_all(handles, self.notify_timeout, "register_agent").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{
        addr, membership, session, ClusterCall, FakeLauncher, RecordingAgents, RecordingCluster,
    };
    use crate::domain::session::SessionInfo;

    struct Fixture {
        scheduler: SpawnScheduler,
        portfolios: Arc<SessionPortfolioStore>,
        cluster: Arc<RecordingCluster>,
        agents: Arc<RecordingAgents>,
        launcher: Arc<FakeLauncher>,
        apps: tempfile::TempDir,
    }

    /// Registry order: `self:1`, then `peers`.
    async fn fixture(peers: &[&str]) -> Fixture {
        let cluster = Arc::new(RecordingCluster::default());
        let agents = Arc::new(RecordingAgents::default());
        let launcher = Arc::new(FakeLauncher::default());
        let registry = membership("self:1", peers, cluster.clone()).await;
        let portfolios = Arc::new(SessionPortfolioStore::new(registry.clone(), cluster.clone()));
        let apps = tempfile::tempdir().unwrap();
        let scheduler = SpawnScheduler::new(
            portfolios.clone(),
            registry,
            cluster.clone(),
            agents.clone(),
            launcher.clone(),
            PackageDeployer::new(apps.path()),
            "http://self:1".to_string(),
            Duration::from_secs(5),
        );
        Fixture {
            scheduler,
            portfolios,
            cluster,
            agents,
            launcher,
            apps,
        }
    }

    fn directives(cluster: &RecordingCluster) -> Vec<(NodeAddress, SpawnRequest)> {
        cluster
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ClusterCall::DirectedSpawn(node, r) => Some((node, r)),
                _ => None,
            })
            .collect()
    }

    fn directive(session: &SessionInfo, offset: u16) -> SpawnRequest {
        let mut request = SpawnRequest::new(session.clone(), 1, "worker", None, vec!["--fast".to_string()]);
        request.offset = offset;
        request.is_directive = true;
        request
    }

    #[tokio::test]
    async fn test_round_robin_fan_out_with_three_nodes() {
        let f = fixture(&["b:1", "c:1"]).await;
        let s = session();

        f.scheduler
            .handle(SpawnRequest::new(s.clone(), 5, "worker", Some(vec![9, 9]), vec![]))
            .await;

        let sent = directives(&f.cluster);
        let summary: Vec<(&str, u16, bool)> = sent
            .iter()
            .map(|(n, r)| (n.as_str(), r.offset, r.package.is_some()))
            .collect();
        assert_eq!(
            summary,
            vec![("b:1", 0, true), ("c:1", 1, true), ("b:1", 3, false), ("c:1", 4, false)]
        );

        // The directive for this node went onto the local queue.
        assert_eq!(f.scheduler.queue.len(), 1);
        let local = f.scheduler.queue.pop().await.unwrap();
        assert!(local.is_directive);
        assert_eq!(local.offset, 2);
        assert_eq!(local.package, Some(vec![9, 9]));
    }

    #[tokio::test]
    async fn test_package_resent_after_failed_first_directive() {
        let f = fixture(&["b:1"]).await;
        f.cluster.set_unreachable("b:1");
        let s = session();

        f.scheduler
            .handle(SpawnRequest::new(s, 4, "worker", Some(vec![1]), vec![]))
            .await;

        let to_b: Vec<bool> = directives(&f.cluster)
            .iter()
            .filter(|(n, _)| n == &addr("b:1"))
            .map(|(_, r)| r.package.is_some())
            .collect();
        assert_eq!(to_b, vec![true, true]);
    }

    #[tokio::test]
    async fn test_capacity_strategy_per_node() {
        let f = fixture(&["b:1"]).await;
        let s = session();

        f.scheduler
            .handle(SpawnRequest::new(s, 0, "worker", None, vec![]).with_strategy(6, 3.0))
            .await;

        assert_eq!(directives(&f.cluster).len(), 3);
        assert_eq!(f.scheduler.queue.len(), 3);
    }

    #[tokio::test]
    async fn test_first_directive_launches_process_and_announces() {
        let f = fixture(&["b:1", "c:1"]).await;
        let s = session();

        f.scheduler.handle(directive(&s, 4)).await;

        let launches = f.launcher.launches.lock().clone();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].agent_id, 5);
        assert_eq!(launches[0].args, vec!["--fast".to_string()]);
        assert_eq!(launches[0].node_url, "http://self:1");

        let snapshot = f.portfolios.snapshot(s.session_id).unwrap();
        assert_eq!(snapshot.local_ids, vec![5]);
        assert!(snapshot.has_process);
        assert_eq!(snapshot.host, Some(AgentName::new(5, s.session_id)));

        let announced: Vec<ClusterCall> = f
            .cluster
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ClusterCall::RegisterAgent(..)))
            .collect();
        assert_eq!(announced.len(), 2);
        assert!(announced.contains(&ClusterCall::RegisterAgent(addr("b:1"), s.session_id, 5, addr("self:1"))));
    }

    #[tokio::test]
    async fn test_later_directives_spawn_in_host_process() {
        let f = fixture(&[]).await;
        let s = session();

        f.scheduler.handle(directive(&s, 0)).await;
        f.scheduler.handle(directive(&s, 1)).await;

        assert_eq!(f.launcher.launches.lock().len(), 1);
        let spawned = f.agents.spawned.lock().clone();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].0, AgentName::new(1, s.session_id));
        assert_eq!(spawned[0].1, 2);
        assert_eq!(f.portfolios.running_agents(s.session_id), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_master_node_hosts_workers_in_master_process() {
        let f = fixture(&[]).await;
        let s = session();
        f.portfolios.register_master_agent(&s).await;

        f.scheduler.handle(directive(&s, 0)).await;

        assert!(f.launcher.launches.lock().is_empty());
        let spawned = f.agents.spawned.lock().clone();
        assert_eq!(spawned[0].0, AgentName::new(0, s.session_id));
        assert_eq!(f.portfolios.running_agents(s.session_id), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_failed_in_process_spawn_is_not_recorded() {
        let f = fixture(&[]).await;
        let s = session();
        f.portfolios.register_master_agent(&s).await;
        f.agents.set_failing(AgentName::new(0, s.session_id));

        f.scheduler.handle(directive(&s, 0)).await;

        assert_eq!(f.portfolios.running_agents(s.session_id), vec![0]);
    }

    #[tokio::test]
    async fn test_reserved_agent_ids_are_rejected() {
        let f = fixture(&[]).await;
        let s = session();
        let mut to_broadcast = directive(&s, 65534);
        to_broadcast.count = 1;
        let mut to_master = directive(&s, 0);
        to_master.count = 0;

        f.scheduler.handle(to_broadcast).await;
        f.scheduler.handle(to_master).await;

        assert!(f.launcher.launches.lock().is_empty());
        assert!(f.portfolios.snapshot(s.session_id).is_none());
    }

    #[tokio::test]
    async fn test_directive_unpacks_package_once() {
        let f = fixture(&[]).await;
        let s = session();
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("worker"), b"bin").unwrap();
        let package = crate::infrastructure::package::pack_directory(source.path()).unwrap();

        let mut first = directive(&s, 0);
        first.package = Some(package);
        f.scheduler.handle(first).await;

        let launches = f.launcher.launches.lock().clone();
        assert!(launches[0].working_dir.ends_with(format!("app-{}", s.session_id)));
        assert!(launches[0].program().is_file());
    }

    #[tokio::test]
    async fn test_directive_for_running_agent_is_dropped() {
        let f = fixture(&[]).await;
        let s = session();
        f.portfolios.register_master_agent(&s).await;

        f.scheduler.handle(directive(&s, 0)).await;
        f.scheduler.handle(directive(&s, 0)).await;

        assert_eq!(f.agents.spawned.lock().len(), 1);
        assert_eq!(f.portfolios.running_agents(s.session_id), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_offsets_follow_reserved_ids() {
        let f = fixture(&["b:1"]).await;
        let s = session();
        f.portfolios.register_master_agent(&s).await;

        f.scheduler.handle(SpawnRequest::new(s.clone(), 2, "worker", None, vec![])).await;
        f.scheduler.handle(SpawnRequest::new(s.clone(), 2, "worker", None, vec![])).await;

        // No agent has started yet; the second ask still numbers after the first.
        let remote: Vec<AgentId> = directives(&f.cluster)
            .iter()
            .map(|(_, r)| r.target_agent_id())
            .collect();
        assert_eq!(remote, vec![1, 3]);
        let mut local = Vec::new();
        while !f.scheduler.queue.is_empty() {
            local.push(f.scheduler.queue.pop().await.unwrap().target_agent_id());
        }
        assert_eq!(local, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_kill_during_unpack_removes_deployment() {
        let f = fixture(&[]).await;
        let s = session();
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("worker"), b"bin").unwrap();
        let mut first = directive(&s, 0);
        first.package = Some(crate::infrastructure::package::pack_directory(source.path()).unwrap());

        // The unpack yields to the file system, so the kill lands while it runs.
        tokio::join!(f.scheduler.handle(first), f.portfolios.kill_session_local(s.session_id));

        assert!(!f.apps.path().join(format!("app-{}", s.session_id)).exists());
        assert!(f.portfolios.snapshot(s.session_id).is_none());
    }
}
