// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Recording transports and fake processes for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::membership::ClusterMembershipRegistry;
use crate::domain::cluster::{ClusterNode, NodeAddress};
use crate::domain::message::Message;
use crate::domain::runtime::{AgentLauncher, AgentProcess, LaunchSpec, RuntimeError};
use crate::domain::session::{AgentId, AgentName, SessionId, SessionInfo};
use crate::domain::spawn::SpawnRequest;
use crate::domain::transport::{AgentClient, ClusterClient, TransportError};
use crate::infrastructure::repositories::InMemoryClusterRegistryStore;

pub fn addr(s: &str) -> NodeAddress {
    s.parse().unwrap()
}

pub fn session() -> SessionInfo {
    SessionInfo::new(SessionId::new(), "master", "")
}

/// Poll `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    DirectedSpawn(NodeAddress, SpawnRequest),
    RegisterAgent(NodeAddress, SessionId, AgentId, NodeAddress),
    UnregisterAgent(NodeAddress, SessionId, AgentId),
    RegisterNode(NodeAddress, NodeAddress),
    UnregisterNode(NodeAddress, NodeAddress),
    ListNodes(NodeAddress),
    Relay(NodeAddress, Message),
    KillSession(NodeAddress, SessionId),
}

/// Cluster transport that records every call and fails calls to nodes marked
/// unreachable.
#[derive(Default)]
pub struct RecordingCluster {
    calls: Mutex<Vec<ClusterCall>>,
    unreachable: Mutex<HashSet<NodeAddress>>,
}

impl RecordingCluster {
    pub fn set_unreachable(&self, node: &str) {
        self.unreachable.lock().insert(addr(node));
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().clone()
    }

    fn record(&self, node: &NodeAddress, call: ClusterCall) -> Result<(), TransportError> {
        self.calls.lock().push(call);
        if self.unreachable.lock().contains(node) {
            return Err(TransportError::Unreachable(node.to_string(), "connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for RecordingCluster {
    async fn directed_spawn(&self, node: &NodeAddress, request: &SpawnRequest) -> Result<(), TransportError> {
        self.record(node, ClusterCall::DirectedSpawn(node.clone(), request.clone()))
    }

    async fn register_agent(
        &self,
        node: &NodeAddress,
        session: &SessionInfo,
        agent_id: AgentId,
        location: &NodeAddress,
    ) -> Result<(), TransportError> {
        self.record(
            node,
            ClusterCall::RegisterAgent(node.clone(), session.session_id, agent_id, location.clone()),
        )
    }

    async fn unregister_agent(
        &self,
        node: &NodeAddress,
        session_id: SessionId,
        agent_id: AgentId,
    ) -> Result<(), TransportError> {
        self.record(node, ClusterCall::UnregisterAgent(node.clone(), session_id, agent_id))
    }

    async fn register_node(&self, node: &NodeAddress, info: &ClusterNode) -> Result<(), TransportError> {
        self.record(node, ClusterCall::RegisterNode(node.clone(), info.address.clone()))
    }

    async fn unregister_node(&self, node: &NodeAddress, info: &ClusterNode) -> Result<(), TransportError> {
        self.record(node, ClusterCall::UnregisterNode(node.clone(), info.address.clone()))
    }

    async fn list_nodes(&self, node: &NodeAddress) -> Result<Vec<ClusterNode>, TransportError> {
        self.record(node, ClusterCall::ListNodes(node.clone()))?;
        Ok(Vec::new())
    }

    async fn relay_message(&self, node: &NodeAddress, message: &Message) -> Result<(), TransportError> {
        self.record(node, ClusterCall::Relay(node.clone(), message.clone()))
    }

    async fn kill_session(&self, node: &NodeAddress, session_id: SessionId) -> Result<(), TransportError> {
        self.record(node, ClusterCall::KillSession(node.clone(), session_id))
    }
}

/// Agent transport that records deliveries and in-process spawns.
#[derive(Default)]
pub struct RecordingAgents {
    pub delivered: Mutex<Vec<(AgentName, Message)>>,
    pub spawned: Mutex<Vec<(AgentName, AgentId, String, Vec<String>)>>,
    failing: Mutex<HashSet<AgentName>>,
}

impl RecordingAgents {
    pub fn set_failing(&self, agent: AgentName) {
        self.failing.lock().insert(agent);
    }

    pub fn delivered_to(&self, agent: &AgentName) -> Vec<Message> {
        self.delivered
            .lock()
            .iter()
            .filter(|(name, _)| name == agent)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn check(&self, agent: &AgentName) -> Result<(), TransportError> {
        if self.failing.lock().contains(agent) {
            return Err(TransportError::Unreachable(agent.to_string(), "agent endpoint gone".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentClient for RecordingAgents {
    async fn ping(&self, agent: &AgentName) -> Result<(), TransportError> {
        self.check(agent)
    }

    async fn send(&self, agent: &AgentName, message: &Message) -> Result<(), TransportError> {
        self.check(agent)?;
        self.delivered.lock().push((agent.clone(), message.clone()));
        Ok(())
    }

    async fn spawn_in_process(
        &self,
        agent: &AgentName,
        agent_id: AgentId,
        executable: &str,
        args: &[String],
    ) -> Result<(), TransportError> {
        self.check(agent)?;
        self.spawned
            .lock()
            .push((agent.clone(), agent_id, executable.to_string(), args.to_vec()));
        Ok(())
    }

    async fn child_agent_count(&self, agent: &AgentName) -> Result<u32, TransportError> {
        self.check(agent)?;
        Ok(0)
    }

    async fn read_log(&self, agent: &AgentName) -> Result<Vec<String>, TransportError> {
        self.check(agent)?;
        Ok(Vec::new())
    }
}

#[derive(Debug)]
pub struct FakeProcess {
    pub killed: Arc<AtomicBool>,
}

#[async_trait]
impl AgentProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    async fn kill_and_wait(&mut self) -> Result<(), RuntimeError> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// Launcher handing out [`FakeProcess`]es and remembering what it launched.
#[derive(Default)]
pub struct FakeLauncher {
    pub launches: Mutex<Vec<LaunchSpec>>,
    pub kill_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

#[async_trait]
impl AgentLauncher for FakeLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn AgentProcess>, RuntimeError> {
        let killed = Arc::new(AtomicBool::new(false));
        self.launches.lock().push(spec);
        self.kill_flags.lock().push(killed.clone());
        Ok(Box::new(FakeProcess { killed }))
    }
}

/// Membership registry for `self_address` that already knows `peers` as active.
pub async fn membership(
    self_address: &str,
    peers: &[&str],
    cluster: Arc<RecordingCluster>,
) -> Arc<ClusterMembershipRegistry> {
    let registry = Arc::new(ClusterMembershipRegistry::new(
        ClusterNode::new(addr(self_address), 4, "self"),
        Vec::new(),
        Arc::new(InMemoryClusterRegistryStore::new()),
        cluster,
        Duration::from_secs(5),
    ));
    for peer in peers {
        registry.register_node(ClusterNode::new(addr(peer), 4, *peer)).await;
    }
    registry
}
