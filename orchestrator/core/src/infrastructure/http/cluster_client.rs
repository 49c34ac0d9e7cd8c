// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::wire::{self, RegisterAgentBody};
use super::{check, decode};
use crate::domain::cluster::{ClusterNode, NodeAddress};
use crate::domain::message::Message;
use crate::domain::session::{AgentId, SessionId, SessionInfo};
use crate::domain::spawn::SpawnRequest;
use crate::domain::transport::{ClusterClient, TransportError};

/// Node-to-node calls over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClusterClient {
    client: Client,
}

impl HttpClusterClient {
    /// Client whose calls give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn url(node: &NodeAddress, path: &str) -> String {
        format!("{}{}", node.base_url(), path)
    }

    async fn post<B: Serialize + Sync>(&self, node: &NodeAddress, path: &str, body: &B) -> Result<(), TransportError> {
        let url = Self::url(node, path);
        check(&url, self.client.post(&url).json(body).send().await).await?;
        Ok(())
    }

    async fn delete(&self, node: &NodeAddress, path: &str) -> Result<(), TransportError> {
        let url = Self::url(node, path);
        check(&url, self.client.delete(&url).send().await).await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn directed_spawn(&self, node: &NodeAddress, request: &SpawnRequest) -> Result<(), TransportError> {
        self.post(node, wire::CLUSTER_SPAWN, request).await
    }

    async fn register_agent(
        &self,
        node: &NodeAddress,
        session: &SessionInfo,
        agent_id: AgentId,
        location: &NodeAddress,
    ) -> Result<(), TransportError> {
        let body = RegisterAgentBody {
            session: session.clone(),
            agent_id,
            location: location.clone(),
        };
        self.post(node, wire::CLUSTER_AGENTS, &body).await
    }

    async fn unregister_agent(
        &self,
        node: &NodeAddress,
        session_id: SessionId,
        agent_id: AgentId,
    ) -> Result<(), TransportError> {
        self.delete(node, &wire::cluster_agent(session_id, agent_id)).await
    }

    async fn register_node(&self, node: &NodeAddress, info: &ClusterNode) -> Result<(), TransportError> {
        self.post(node, wire::CLUSTER_NODES, info).await
    }

    async fn unregister_node(&self, node: &NodeAddress, info: &ClusterNode) -> Result<(), TransportError> {
        self.post(node, wire::CLUSTER_NODES_UNREGISTER, info).await
    }

    async fn list_nodes(&self, node: &NodeAddress) -> Result<Vec<ClusterNode>, TransportError> {
        let url = Self::url(node, wire::CLUSTER_NODES);
        let response = check(&url, self.client.get(&url).send().await).await?;
        decode(&url, response).await
    }

    async fn relay_message(&self, node: &NodeAddress, message: &Message) -> Result<(), TransportError> {
        self.post(node, wire::CLUSTER_MESSAGES, message).await
    }

    async fn kill_session(&self, node: &NodeAddress, session_id: SessionId) -> Result<(), TransportError> {
        self.delete(node, &wire::cluster_session(session_id)).await
    }
}
