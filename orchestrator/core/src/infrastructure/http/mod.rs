// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP Transport
//!
//! `reqwest` adapters for the [`ClusterClient`](crate::domain::transport::ClusterClient)
//! and [`AgentClient`](crate::domain::transport::AgentClient) ports. Bodies are
//! JSON; see [`wire`] for the routes and payloads.

pub mod agent_client;
pub mod cluster_client;
pub mod wire;

pub use agent_client::{AgentDirectory, HttpAgentClient};
pub use cluster_client::HttpClusterClient;

use serde::de::DeserializeOwned;

use crate::domain::transport::TransportError;

/// Map a send result to a successful response or a [`TransportError`].
pub(crate) async fn check(
    endpoint: &str,
    sent: Result<reqwest::Response, reqwest::Error>,
) -> Result<reqwest::Response, TransportError> {
    let response = sent.map_err(|e| TransportError::Unreachable(endpoint.to_string(), e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<wire::ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(TransportError::Remote {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    })
}

pub(crate) async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, TransportError> {
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::Decode(endpoint.to_string(), e.to_string()))
}
