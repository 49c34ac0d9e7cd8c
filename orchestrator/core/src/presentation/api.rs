// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tracing::debug;

use crate::application::{ManagementInfo, NodeVisor};
use crate::domain::cluster::ClusterNode;
use crate::domain::message::Message;
use crate::domain::session::{AgentId, AgentName, SessionId, MASTER_AGENT_ID};
use crate::domain::spawn::SpawnRequest;
use crate::infrastructure::http::wire::{
    self, AcceptedBody, AttachAgentBody, ErrorBody, MasterBody, PingBody, RegisterAgentBody, SpawnBody,
};
use crate::infrastructure::http::AgentDirectory;

pub struct AppState {
    pub node: Arc<NodeVisor>,
    pub directory: Arc<AgentDirectory>,
    pub start_time: Instant,
}

pub fn app(node: Arc<NodeVisor>, directory: Arc<AgentDirectory>) -> Router {
    let state = Arc::new(AppState {
        node,
        directory,
        start_time: Instant::now(),
    });

    Router::new()
        .route(wire::HEALTH, get(health))
        // node to node
        .route(wire::CLUSTER_SPAWN, post(directed_spawn))
        .route(wire::CLUSTER_AGENTS, post(register_agent))
        .route("/cluster/sessions/{session_id}/agents/{agent_id}", delete(unregister_agent))
        .route(wire::CLUSTER_NODES, get(list_nodes).post(register_node))
        .route(wire::CLUSTER_NODES_UNREGISTER, post(unregister_node))
        .route(wire::CLUSTER_MESSAGES, post(relay_message))
        .route("/cluster/sessions/{session_id}", delete(kill_session_local))
        .route(wire::CLUSTER_INFO, get(management_info))
        // agent to node
        .route(wire::LOCAL_PING, post(ping))
        .route(wire::LOCAL_SPAWN, post(spawn))
        .route(wire::LOCAL_SEND, post(send))
        .route(wire::LOCAL_BROADCAST, post(broadcast))
        .route(wire::LOCAL_MASTER, post(register_master_agent))
        .route(wire::LOCAL_ATTACH, post(attach_agent))
        .route("/local/sessions/{session_id}/agents", get(running_agents))
        .route("/local/sessions/{session_id}/agents/{agent_id}", delete(unregister_local_agent))
        .route("/local/sessions/{session_id}", delete(kill_session))
        .with_state(state)
}

/// Rejected because the node is shutting down.
struct Unavailable;

impl IntoResponse for Unavailable {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: "node is shutting down".to_string(),
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

fn accepted(queued: bool) -> Result<StatusCode, Unavailable> {
    if queued {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(Unavailable)
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "node": state.node.address(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn directed_spawn(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpawnRequest>,
) -> Result<StatusCode, Unavailable> {
    accepted(state.node.directed_spawn_request(request))
}

async fn register_agent(State(state): State<Arc<AppState>>, Json(body): Json<RegisterAgentBody>) -> StatusCode {
    state.node.register_agent(&body.session, body.agent_id, body.location);
    StatusCode::NO_CONTENT
}

async fn unregister_agent(
    State(state): State<Arc<AppState>>,
    Path((session_id, agent_id)): Path<(SessionId, AgentId)>,
) -> StatusCode {
    state.node.unregister_agent(session_id, agent_id);
    StatusCode::NO_CONTENT
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<Vec<ClusterNode>> {
    Json(state.node.list_nodes().await)
}

async fn register_node(State(state): State<Arc<AppState>>, Json(info): Json<ClusterNode>) -> StatusCode {
    state.node.register_cluster_node(info).await;
    StatusCode::NO_CONTENT
}

async fn unregister_node(State(state): State<Arc<AppState>>, Json(info): Json<ClusterNode>) -> StatusCode {
    state.node.unregister_cluster_node(info).await;
    StatusCode::NO_CONTENT
}

async fn relay_message(
    State(state): State<Arc<AppState>>,
    Json(message): Json<Message>,
) -> Result<StatusCode, Unavailable> {
    accepted(state.node.relay_message(message))
}

async fn kill_session_local(State(state): State<Arc<AppState>>, Path(session_id): Path<SessionId>) -> StatusCode {
    state.node.kill_session_local(session_id).await;
    state.directory.forget_session(session_id);
    StatusCode::NO_CONTENT
}

async fn management_info(State(state): State<Arc<AppState>>) -> Json<ManagementInfo> {
    Json(state.node.management_info().await)
}

async fn ping(State(state): State<Arc<AppState>>, Json(body): Json<PingBody>) -> Json<PingBody> {
    Json(PingBody {
        echo: state.node.ping(body.echo),
    })
}

async fn spawn(State(state): State<Arc<AppState>>, Json(body): Json<SpawnBody>) -> Json<AcceptedBody> {
    let accepted = state.node.spawn_with_strategy(
        body.session,
        body.count,
        body.executable,
        body.package,
        body.args,
        body.strategy,
        body.factor,
    );
    Json(AcceptedBody { accepted })
}

async fn send(State(state): State<Arc<AppState>>, Json(message): Json<Message>) -> Json<AcceptedBody> {
    Json(AcceptedBody {
        accepted: state.node.send(message),
    })
}

async fn broadcast(State(state): State<Arc<AppState>>, Json(message): Json<Message>) -> Json<AcceptedBody> {
    Json(AcceptedBody {
        accepted: state.node.broadcast(message),
    })
}

async fn register_master_agent(State(state): State<Arc<AppState>>, Json(body): Json<MasterBody>) -> StatusCode {
    state.node.register_master_agent(&body.session).await;
    StatusCode::NO_CONTENT
}

async fn attach_agent(State(state): State<Arc<AppState>>, Json(body): Json<AttachAgentBody>) -> StatusCode {
    debug!(session_id = %body.session_id, agent_id = body.agent_id, url = %body.url, "Agent host attached");
    state
        .directory
        .attach(AgentName::new(body.agent_id, body.session_id), body.url);
    StatusCode::NO_CONTENT
}

async fn running_agents(State(state): State<Arc<AppState>>, Path(session_id): Path<SessionId>) -> Json<Vec<AgentId>> {
    Json(state.node.running_agents(session_id))
}

async fn unregister_local_agent(
    State(state): State<Arc<AppState>>,
    Path((session_id, agent_id)): Path<(SessionId, AgentId)>,
) -> StatusCode {
    state.node.unregister_local_agent(session_id, agent_id).await;
    if agent_id == MASTER_AGENT_ID {
        state.directory.forget_session(session_id);
    } else {
        state.directory.detach(&AgentName::new(agent_id, session_id));
    }
    StatusCode::NO_CONTENT
}

async fn kill_session(State(state): State<Arc<AppState>>, Path(session_id): Path<SessionId>) -> StatusCode {
    state.node.kill_session(session_id).await;
    state.directory.forget_session(session_id);
    StatusCode::NO_CONTENT
}
