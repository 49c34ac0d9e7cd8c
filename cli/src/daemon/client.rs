// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for the management side of a node's API

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use visor_core::application::ManagementInfo;
use visor_core::domain::cluster::ClusterNode;
use visor_core::domain::session::{AgentId, SessionId};
use visor_core::infrastructure::http::wire::{self, ErrorBody};

use super::node_base_url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: node_base_url(host, port),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn cluster_nodes(&self) -> Result<Vec<ClusterNode>> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, wire::CLUSTER_NODES))
            .send()
            .await
            .context("Failed to list cluster nodes")?;
        parse(response, "list cluster nodes").await
    }

    pub async fn cluster_info(&self) -> Result<ManagementInfo> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, wire::CLUSTER_INFO))
            .send()
            .await
            .context("Failed to get cluster info")?;
        parse(response, "get cluster info").await
    }

    /// Agents of `session_id` hosted on this node, ascending.
    pub async fn running_agents(&self, session_id: SessionId) -> Result<Vec<AgentId>> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, wire::local_agents(session_id)))
            .send()
            .await
            .context("Failed to list session agents")?;
        parse(response, "list session agents").await
    }

    /// End the session on every node of the cluster.
    pub async fn kill_session(&self, session_id: SessionId) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}{}", self.base_url, wire::local_session(session_id)))
            .send()
            .await
            .context("Failed to kill session")?;
        check(response, "kill session").await?;
        Ok(())
    }
}

async fn check(response: Response, action: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    anyhow::bail!("Failed to {}: HTTP {} {}", action, status, message)
}

async fn parse<T: DeserializeOwned>(response: Response, action: &str) -> Result<T> {
    check(response, action)
        .await?
        .json()
        .await
        .with_context(|| format!("Failed to parse response to {}", action))
}
