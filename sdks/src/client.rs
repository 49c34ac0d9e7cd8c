// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent-to-node calls.
//!
//! [`NodeClient`] talks to the node daemon over HTTP. [`InProcessNode`] calls
//! a [`NodeVisor`] living in the same process, for single-process runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use visor_core::application::NodeVisor;
use visor_core::domain::message::Message;
use visor_core::domain::session::{AgentId, SessionId, SessionInfo};
use visor_core::infrastructure::http::wire::{
    self, AcceptedBody, AttachAgentBody, ErrorBody, MasterBody, PingBody, SpawnBody,
};

use crate::error::{Result, SdkError};

/// Operations an agent performs against its hosting node.
#[async_trait]
pub trait NodeConnection: Send + Sync {
    async fn ping(&self, echo: i32) -> Result<i32>;

    /// Ask for workers. `false` means the node is shutting down.
    async fn spawn(&self, request: SpawnBody) -> Result<bool>;

    async fn send(&self, message: &Message) -> Result<bool>;

    async fn broadcast(&self, message: &Message) -> Result<bool>;

    async fn register_master_agent(&self, session: &SessionInfo) -> Result<()>;

    /// Tell the node where the agent's host endpoint listens.
    async fn attach_agent(&self, session_id: SessionId, agent_id: AgentId, url: &str) -> Result<()>;

    async fn unregister_agent(&self, session_id: SessionId, agent_id: AgentId) -> Result<()>;

    async fn running_agents(&self, session_id: SessionId) -> Result<Vec<AgentId>>;

    async fn kill_session(&self, session_id: SessionId) -> Result<()>;
}

/// HTTP client for a node daemon's `/local` surface.
#[derive(Debug, Clone)]
pub struct NodeClient {
    base_url: String,
    client: Client,
}

impl NodeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|source| SdkError::Transport {
            url: "client builder".to_string(),
            source,
        })?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.url(path);
        let sent = self.client.post(&url).json(body).send().await;
        check(url, sent).await
    }

    async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        let sent = self.client.get(&url).send().await;
        check(url, sent).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        let sent = self.client.delete(&url).send().await;
        check(url, sent).await.map(|_| ())
    }
}

async fn check(url: String, sent: std::result::Result<Response, reqwest::Error>) -> Result<Response> {
    let response = sent.map_err(|source| SdkError::Transport { url: url.clone(), source })?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
    };
    Err(SdkError::Remote {
        url,
        status: status.as_u16(),
        message,
    })
}

async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().to_string();
    response.json().await.map_err(|source| SdkError::Transport { url, source })
}

#[async_trait]
impl NodeConnection for NodeClient {
    async fn ping(&self, echo: i32) -> Result<i32> {
        let body: PingBody = json(self.post(wire::LOCAL_PING, &PingBody { echo }).await?).await?;
        Ok(body.echo)
    }

    async fn spawn(&self, request: SpawnBody) -> Result<bool> {
        let body: AcceptedBody = json(self.post(wire::LOCAL_SPAWN, &request).await?).await?;
        Ok(body.accepted)
    }

    async fn send(&self, message: &Message) -> Result<bool> {
        let body: AcceptedBody = json(self.post(wire::LOCAL_SEND, message).await?).await?;
        Ok(body.accepted)
    }

    async fn broadcast(&self, message: &Message) -> Result<bool> {
        let body: AcceptedBody = json(self.post(wire::LOCAL_BROADCAST, message).await?).await?;
        Ok(body.accepted)
    }

    async fn register_master_agent(&self, session: &SessionInfo) -> Result<()> {
        let body = MasterBody {
            session: session.clone(),
        };
        self.post(wire::LOCAL_MASTER, &body).await.map(|_| ())
    }

    async fn attach_agent(&self, session_id: SessionId, agent_id: AgentId, url: &str) -> Result<()> {
        let body = AttachAgentBody {
            session_id,
            agent_id,
            url: url.to_string(),
        };
        self.post(wire::LOCAL_ATTACH, &body).await.map(|_| ())
    }

    async fn unregister_agent(&self, session_id: SessionId, agent_id: AgentId) -> Result<()> {
        self.delete(&wire::local_agent(session_id, agent_id)).await
    }

    async fn running_agents(&self, session_id: SessionId) -> Result<Vec<AgentId>> {
        json(self.get(&wire::local_agents(session_id)).await?).await
    }

    async fn kill_session(&self, session_id: SessionId) -> Result<()> {
        self.delete(&wire::local_session(session_id)).await
    }
}

/// Direct calls into a node running in this process.
///
/// Agent endpoints are attached to the loopback transport by whoever builds
/// the node, so [`NodeConnection::attach_agent`] has nothing to do here.
#[derive(Clone)]
pub struct InProcessNode {
    node: Arc<NodeVisor>,
}

impl InProcessNode {
    pub fn new(node: Arc<NodeVisor>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Arc<NodeVisor> {
        &self.node
    }
}

#[async_trait]
impl NodeConnection for InProcessNode {
    async fn ping(&self, echo: i32) -> Result<i32> {
        Ok(self.node.ping(echo))
    }

    async fn spawn(&self, request: SpawnBody) -> Result<bool> {
        Ok(self.node.spawn_with_strategy(
            request.session,
            request.count,
            request.executable,
            request.package,
            request.args,
            request.strategy,
            request.factor,
        ))
    }

    async fn send(&self, message: &Message) -> Result<bool> {
        Ok(self.node.send(message.clone()))
    }

    async fn broadcast(&self, message: &Message) -> Result<bool> {
        Ok(self.node.broadcast(message.clone()))
    }

    async fn register_master_agent(&self, session: &SessionInfo) -> Result<()> {
        self.node.register_master_agent(session).await;
        Ok(())
    }

    async fn attach_agent(&self, _session_id: SessionId, _agent_id: AgentId, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn unregister_agent(&self, session_id: SessionId, agent_id: AgentId) -> Result<()> {
        self.node.unregister_local_agent(session_id, agent_id).await;
        Ok(())
    }

    async fn running_agents(&self, session_id: SessionId) -> Result<Vec<AgentId>> {
        Ok(self.node.running_agents(session_id))
    }

    async fn kill_session(&self, session_id: SessionId) -> Result<()> {
        self.node.kill_session(session_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let app = Router::new().route(
            wire::LOCAL_PING,
            post(|Json(body): Json<PingBody>| async move { Json(body) }),
        );
        let client = NodeClient::new(serve(app).await);
        assert!(!client.base_url().ends_with('/'));
        assert_eq!(tokio_test::assert_ok!(client.ping(11).await), 11);
    }

    #[tokio::test]
    async fn test_remote_error_message_is_kept() {
        let app = Router::new().route(
            wire::LOCAL_SEND,
            post(|| async {
                let body = ErrorBody {
                    error: "node is shutting down".to_string(),
                };
                (StatusCode::SERVICE_UNAVAILABLE, Json(body))
            }),
        );
        let client = NodeClient::new(serve(app).await);
        let message = Message::new(SessionId::new(), 1, 0, 0, serde_json::Value::Null);
        let err = client.send(&message).await.unwrap_err();
        match err {
            SdkError::Remote { status, message, .. } => {
                assert_eq!(status, 503);
                assert_eq!(message, "node is shutting down");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = NodeClient::with_timeout(format!("http://{addr}"), Duration::from_millis(500)).unwrap();
        let err = client.running_agents(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, SdkError::Transport { .. }));
    }
}
