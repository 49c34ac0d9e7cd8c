// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Remote Call Ports
//!
//! The node core never speaks a wire protocol itself. Every cross-process call
//! goes through one of two ports, each a single synchronous round trip that
//! reports transport and remote faults as [`TransportError`]:
//!
//! | Port | Direction | Addressed by |
//! |------|-----------|--------------|
//! | [`ClusterClient`] | node → node | [`NodeAddress`] |
//! | [`AgentClient`] | node → agent | [`AgentName`] |
//!
//! Adapters live in `crate::infrastructure` (HTTP and in-process loopback).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::cluster::{ClusterNode, NodeAddress};
use crate::domain::message::Message;
use crate::domain::session::{AgentId, AgentName, SessionId, SessionInfo};
use crate::domain::spawn::SpawnRequest;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Endpoint {0} is unreachable: {1}")]
    Unreachable(String, String),

    #[error("Remote call to {endpoint} failed with status {status}: {message}")]
    Remote {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("No endpoint is known for agent {0}")]
    UnknownAgent(AgentName),

    #[error("Failed to decode reply from {0}: {1}")]
    Decode(String, String),
}

/// Calls one node makes on another.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn directed_spawn(&self, node: &NodeAddress, request: &SpawnRequest) -> Result<(), TransportError>;

    /// Tell `node` that `agent_id` of `session` lives on `location`.
    async fn register_agent(
        &self,
        node: &NodeAddress,
        session: &SessionInfo,
        agent_id: AgentId,
        location: &NodeAddress,
    ) -> Result<(), TransportError>;

    async fn unregister_agent(
        &self,
        node: &NodeAddress,
        session_id: SessionId,
        agent_id: AgentId,
    ) -> Result<(), TransportError>;

    async fn register_node(&self, node: &NodeAddress, info: &ClusterNode) -> Result<(), TransportError>;

    async fn unregister_node(&self, node: &NodeAddress, info: &ClusterNode) -> Result<(), TransportError>;

    async fn list_nodes(&self, node: &NodeAddress) -> Result<Vec<ClusterNode>, TransportError>;

    async fn relay_message(&self, node: &NodeAddress, message: &Message) -> Result<(), TransportError>;

    /// Tear down `session_id` on `node` only; the receiver does not fan out again.
    async fn kill_session(&self, node: &NodeAddress, session_id: SessionId) -> Result<(), TransportError>;
}

/// Calls a node makes on an agent it hosts.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn ping(&self, agent: &AgentName) -> Result<(), TransportError>;

    async fn send(&self, agent: &AgentName, message: &Message) -> Result<(), TransportError>;

    /// Ask the process hosting `agent` to run one more agent in-process.
    async fn spawn_in_process(
        &self,
        agent: &AgentName,
        agent_id: AgentId,
        executable: &str,
        args: &[String],
    ) -> Result<(), TransportError>;

    async fn child_agent_count(&self, agent: &AgentName) -> Result<u32, TransportError>;

    async fn read_log(&self, agent: &AgentName) -> Result<Vec<String>, TransportError>;
}
