// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use tracing::debug;

use super::wire::{self, CountBody, InProcessSpawnBody};
use super::{check, decode};
use crate::domain::message::Message;
use crate::domain::session::{AgentId, AgentName, SessionId};
use crate::domain::transport::{AgentClient, TransportError};

/// Base URLs of the agent hosts running on this node, by agent name.
///
/// Filled by agents announcing themselves through `/local/attach`; an agent
/// spawned in-process shares its host's URL.
#[derive(Debug, Default)]
pub struct AgentDirectory {
    endpoints: RwLock<HashMap<AgentName, String>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, agent: AgentName, url: impl Into<String>) {
        let url = url.into();
        debug!(agent = %agent, url = %url, "Agent endpoint attached");
        self.endpoints.write().insert(agent, url);
    }

    pub fn detach(&self, agent: &AgentName) {
        self.endpoints.write().remove(agent);
    }

    pub fn resolve(&self, agent: &AgentName) -> Option<String> {
        self.endpoints.read().get(agent).cloned()
    }

    /// Forget every endpoint of `session_id`. Returns how many were removed.
    pub fn forget_session(&self, session_id: SessionId) -> usize {
        let suffix = format!("-{}", session_id);
        let mut endpoints = self.endpoints.write();
        let before = endpoints.len();
        endpoints.retain(|name, _| !name.as_str().ends_with(&suffix));
        before - endpoints.len()
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

/// Node-to-agent calls over HTTP, resolved through an [`AgentDirectory`].
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: Client,
    directory: Arc<AgentDirectory>,
}

impl HttpAgentClient {
    pub fn new(directory: Arc<AgentDirectory>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, directory })
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    fn url(&self, agent: &AgentName, leaf: &str) -> Result<String, TransportError> {
        let base = self
            .directory
            .resolve(agent)
            .ok_or_else(|| TransportError::UnknownAgent(agent.clone()))?;
        Ok(format!("{}{}", base.trim_end_matches('/'), wire::agent_path(agent.as_str(), leaf)))
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn ping(&self, agent: &AgentName) -> Result<(), TransportError> {
        let url = self.url(agent, wire::AGENT_PING)?;
        check(&url, self.client.get(&url).send().await).await?;
        Ok(())
    }

    async fn send(&self, agent: &AgentName, message: &Message) -> Result<(), TransportError> {
        let url = self.url(agent, wire::AGENT_MESSAGES)?;
        check(&url, self.client.post(&url).json(message).send().await).await?;
        Ok(())
    }

    async fn spawn_in_process(
        &self,
        agent: &AgentName,
        agent_id: AgentId,
        executable: &str,
        args: &[String],
    ) -> Result<(), TransportError> {
        let url = self.url(agent, wire::AGENT_SPAWN)?;
        let body = InProcessSpawnBody {
            agent_id,
            executable: executable.to_string(),
            args: args.to_vec(),
        };
        check(&url, self.client.post(&url).json(&body).send().await).await?;
        // The new agent is reachable through its host.
        if let (Some(base), Some(session_id)) = (self.directory.resolve(agent), agent.session_id()) {
            self.directory.attach(AgentName::new(agent_id, session_id), base);
        }
        Ok(())
    }

    async fn child_agent_count(&self, agent: &AgentName) -> Result<u32, TransportError> {
        let url = self.url(agent, wire::AGENT_CHILDREN)?;
        let response = check(&url, self.client.get(&url).send().await).await?;
        let body: CountBody = decode(&url, response).await?;
        Ok(body.count)
    }

    async fn read_log(&self, agent: &AgentName) -> Result<Vec<String>, TransportError> {
        let url = self.url(agent, wire::AGENT_LOG)?;
        let response = check(&url, self.client.get(&url).send().await).await?;
        decode(&url, response).await
    }
}
