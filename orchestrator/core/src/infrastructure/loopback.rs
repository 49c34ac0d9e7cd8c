// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Loopback Transport
//!
//! Connects several [`NodeVisor`]s and agent endpoints living in one process.
//! Every port call is a direct method call on the target, so a whole cluster
//! can run inside a test or a single-process deployment.
//!
//! Nodes are held weakly; a dropped node behaves like an unreachable one.
//! [`LoopbackCluster::set_reachable`] simulates a network partition.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::application::NodeVisor;
use crate::domain::cluster::{ClusterNode, NodeAddress};
use crate::domain::message::Message;
use crate::domain::runtime::{AgentLauncher, AgentProcess, LaunchSpec, RuntimeError};
use crate::domain::session::{AgentId, AgentName, SessionId, SessionInfo};
use crate::domain::spawn::SpawnRequest;
use crate::domain::transport::{AgentClient, ClusterClient, TransportError};

/// Something that can receive node-to-agent calls in-process.
#[async_trait]
pub trait AgentEndpoint: Send + Sync {
    /// Hand `message` to `agent_id`. Broadcast copies keep their broadcast
    /// destination, so the target is passed separately.
    async fn deliver(&self, agent_id: AgentId, message: Message) -> Result<(), String>;

    async fn spawn_in_process(&self, agent_id: AgentId, executable: &str, args: &[String]) -> Result<(), String>;

    fn child_agent_count(&self) -> u32;

    fn read_log(&self) -> Vec<String>;
}

#[derive(Default)]
pub struct LoopbackCluster {
    nodes: RwLock<HashMap<NodeAddress, Weak<NodeVisor>>>,
    agents: RwLock<HashMap<AgentName, Arc<dyn AgentEndpoint>>>,
    unreachable: RwLock<HashSet<NodeAddress>>,
}

impl std::fmt::Debug for LoopbackCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackCluster")
            .field("nodes", &self.nodes.read().len())
            .field("agents", &self.agents.read().len())
            .finish()
    }
}

impl LoopbackCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach_node(&self, node: &Arc<NodeVisor>) {
        self.nodes.write().insert(node.address().clone(), Arc::downgrade(node));
    }

    pub fn detach_node(&self, address: &NodeAddress) {
        self.nodes.write().remove(address);
    }

    pub fn attach_agent(&self, agent: AgentName, endpoint: Arc<dyn AgentEndpoint>) {
        debug!(agent = %agent, "Loopback agent attached");
        self.agents.write().insert(agent, endpoint);
    }

    pub fn detach_agent(&self, agent: &AgentName) {
        self.agents.write().remove(agent);
    }

    /// Drop every endpoint of `session_id`; returns how many were attached.
    pub fn detach_session(&self, session_id: SessionId) -> usize {
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|name, _| name.session_id() != Some(session_id));
        before - agents.len()
    }

    pub fn agent(&self, agent: &AgentName) -> Option<Arc<dyn AgentEndpoint>> {
        self.agents.read().get(agent).cloned()
    }

    /// Cut (`false`) or restore (`true`) every call addressed to `address`.
    pub fn set_reachable(&self, address: &NodeAddress, reachable: bool) {
        let mut unreachable = self.unreachable.write();
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.clone());
        }
    }

    fn node(&self, address: &NodeAddress) -> Result<Arc<NodeVisor>, TransportError> {
        if self.unreachable.read().contains(address) {
            return Err(TransportError::Unreachable(address.to_string(), "partitioned".to_string()));
        }
        self.nodes
            .read()
            .get(address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| TransportError::Unreachable(address.to_string(), "no such node".to_string()))
    }

    fn endpoint(&self, agent: &AgentName) -> Result<Arc<dyn AgentEndpoint>, TransportError> {
        self.agent(agent).ok_or_else(|| TransportError::UnknownAgent(agent.clone()))
    }
}

fn queue_closed(address: &NodeAddress) -> TransportError {
    TransportError::Remote {
        endpoint: address.to_string(),
        status: 503,
        message: "node is shutting down".to_string(),
    }
}

fn agent_failed(agent: &AgentName, message: String) -> TransportError {
    TransportError::Remote {
        endpoint: agent.to_string(),
        status: 500,
        message,
    }
}

#[async_trait]
impl ClusterClient for LoopbackCluster {
    async fn directed_spawn(&self, node: &NodeAddress, request: &SpawnRequest) -> Result<(), TransportError> {
        if self.node(node)?.directed_spawn_request(request.clone()) {
            Ok(())
        } else {
            Err(queue_closed(node))
        }
    }

    async fn register_agent(
        &self,
        node: &NodeAddress,
        session: &SessionInfo,
        agent_id: AgentId,
        location: &NodeAddress,
    ) -> Result<(), TransportError> {
        self.node(node)?.register_agent(session, agent_id, location.clone());
        Ok(())
    }

    async fn unregister_agent(
        &self,
        node: &NodeAddress,
        session_id: SessionId,
        agent_id: AgentId,
    ) -> Result<(), TransportError> {
        self.node(node)?.unregister_agent(session_id, agent_id);
        Ok(())
    }

    async fn register_node(&self, node: &NodeAddress, info: &ClusterNode) -> Result<(), TransportError> {
        self.node(node)?.register_cluster_node(info.clone()).await;
        Ok(())
    }

    async fn unregister_node(&self, node: &NodeAddress, info: &ClusterNode) -> Result<(), TransportError> {
        self.node(node)?.unregister_cluster_node(info.clone()).await;
        Ok(())
    }

    async fn list_nodes(&self, node: &NodeAddress) -> Result<Vec<ClusterNode>, TransportError> {
        Ok(self.node(node)?.list_nodes().await)
    }

    async fn relay_message(&self, node: &NodeAddress, message: &Message) -> Result<(), TransportError> {
        if self.node(node)?.relay_message(message.clone()) {
            Ok(())
        } else {
            Err(queue_closed(node))
        }
    }

    async fn kill_session(&self, node: &NodeAddress, session_id: SessionId) -> Result<(), TransportError> {
        self.node(node)?.kill_session_local(session_id).await;
        Ok(())
    }
}

#[async_trait]
impl AgentClient for LoopbackCluster {
    async fn ping(&self, agent: &AgentName) -> Result<(), TransportError> {
        self.endpoint(agent).map(|_| ())
    }

    async fn send(&self, agent: &AgentName, message: &Message) -> Result<(), TransportError> {
        let endpoint = self.endpoint(agent)?;
        let agent_id = agent.agent_id().ok_or_else(|| TransportError::UnknownAgent(agent.clone()))?;
        endpoint
            .deliver(agent_id, message.clone())
            .await
            .map_err(|e| agent_failed(agent, e))
    }

    async fn spawn_in_process(
        &self,
        agent: &AgentName,
        agent_id: AgentId,
        executable: &str,
        args: &[String],
    ) -> Result<(), TransportError> {
        let host = self.endpoint(agent)?;
        host.spawn_in_process(agent_id, executable, args)
            .await
            .map_err(|e| agent_failed(agent, e))?;
        // The new agent is reachable through its host.
        if let Some(session_id) = agent.session_id() {
            self.attach_agent(AgentName::new(agent_id, session_id), host);
        }
        Ok(())
    }

    async fn child_agent_count(&self, agent: &AgentName) -> Result<u32, TransportError> {
        Ok(self.endpoint(agent)?.child_agent_count())
    }

    async fn read_log(&self, agent: &AgentName) -> Result<Vec<String>, TransportError> {
        Ok(self.endpoint(agent)?.read_log())
    }
}

/// Agent endpoint that keeps everything it is given.
#[derive(Debug, Default)]
pub struct InMemoryAgentEndpoint {
    messages: Mutex<Vec<(AgentId, Message)>>,
    children: Mutex<Vec<(AgentId, String, Vec<String>)>>,
    log: Mutex<Vec<String>>,
}

impl InMemoryAgentEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Messages handed to `agent_id` specifically.
    pub fn delivered_to(&self, agent_id: AgentId) -> Vec<Message> {
        self.messages
            .lock()
            .iter()
            .filter(|(id, _)| *id == agent_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn children(&self) -> Vec<AgentId> {
        self.children.lock().iter().map(|(id, _, _)| *id).collect()
    }

    pub fn log_line(&self, line: impl Into<String>) {
        self.log.lock().push(line.into());
    }
}

#[async_trait]
impl AgentEndpoint for InMemoryAgentEndpoint {
    async fn deliver(&self, agent_id: AgentId, message: Message) -> Result<(), String> {
        self.messages.lock().push((agent_id, message));
        Ok(())
    }

    async fn spawn_in_process(&self, agent_id: AgentId, executable: &str, args: &[String]) -> Result<(), String> {
        self.children
            .lock()
            .push((agent_id, executable.to_string(), args.to_vec()));
        Ok(())
    }

    fn child_agent_count(&self) -> u32 {
        u32::try_from(self.children.lock().len()).unwrap_or(u32::MAX)
    }

    fn read_log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

/// Launcher that "starts" an agent by attaching an [`InMemoryAgentEndpoint`]
/// for it to the loopback cluster.
pub struct LoopbackLauncher {
    cluster: Arc<LoopbackCluster>,
    launched: Mutex<Vec<(LaunchSpec, Arc<InMemoryAgentEndpoint>)>>,
}

impl LoopbackLauncher {
    pub fn new(cluster: Arc<LoopbackCluster>) -> Self {
        Self {
            cluster,
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().iter().map(|(spec, _)| spec.clone()).collect()
    }

    /// Endpoint of the process launched for `agent_id` of `session_id`.
    pub fn process_endpoint(&self, session_id: SessionId, agent_id: AgentId) -> Option<Arc<InMemoryAgentEndpoint>> {
        self.launched
            .lock()
            .iter()
            .find(|(spec, _)| spec.session_id == session_id && spec.agent_id == agent_id)
            .map(|(_, endpoint)| endpoint.clone())
    }
}

#[async_trait]
impl AgentLauncher for LoopbackLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn AgentProcess>, RuntimeError> {
        let process_endpoint = InMemoryAgentEndpoint::new();
        let endpoint: Arc<dyn AgentEndpoint> = process_endpoint.clone();
        self.cluster
            .attach_agent(AgentName::new(spec.agent_id, spec.session_id), endpoint.clone());
        self.launched.lock().push((spec, process_endpoint));
        Ok(Box::new(LoopbackProcess {
            cluster: Arc::downgrade(&self.cluster),
            endpoint,
            exited: false,
        }))
    }
}

/// Stand-in process; killing it detaches every agent it hosts.
pub struct LoopbackProcess {
    cluster: Weak<LoopbackCluster>,
    endpoint: Arc<dyn AgentEndpoint>,
    exited: bool,
}

impl std::fmt::Debug for LoopbackProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackProcess").field("exited", &self.exited).finish()
    }
}

#[async_trait]
impl AgentProcess for LoopbackProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn kill_and_wait(&mut self) -> Result<(), RuntimeError> {
        if let Some(cluster) = self.cluster.upgrade() {
            let hosted = Arc::as_ptr(&self.endpoint) as *const ();
            cluster
                .agents
                .write()
                .retain(|_, endpoint| Arc::as_ptr(endpoint) as *const () != hosted);
        }
        self.exited = true;
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        self.exited
    }
}
