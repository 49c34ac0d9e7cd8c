// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Host
//!
//! Everything in an agent process the node calls into: message delivery to
//! the mailboxes of the agents living here, in-process spawning of further
//! agents, the child count and the captured log.
//!
//! Served over HTTP under `/agent/{name}/...` for a node daemon, or attached
//! directly to a [`LoopbackCluster`](visor_core::infrastructure::loopback::LoopbackCluster)
//! through [`AgentEndpoint`].

use std::collections::HashMap;
use std::future::Future;
use std::path::Path as FsPath;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use visor_core::domain::message::Message;
use visor_core::domain::session::{AgentId, AgentName};
use visor_core::infrastructure::http::wire::{CountBody, ErrorBody, InProcessSpawnBody, PingBody};
use visor_core::infrastructure::loopback::AgentEndpoint;

use crate::agent::Agent;
use crate::bootstrap::AgentBootstrap;
use crate::client::NodeConnection;
use crate::error::Result;
use crate::log_buffer::LogBuffer;
use crate::mailbox::AgentMailbox;

/// Body of an agent: runs once per agent, master and workers alike.
pub type AgentEntry = Arc<dyn Fn(Arc<Agent>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async function as an [`AgentEntry`].
pub fn entry<F, Fut>(f: F) -> AgentEntry
where
    F: Fn(Arc<Agent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |agent| Box::pin(f(agent)))
}

pub struct AgentHost {
    me: Weak<AgentHost>,
    bootstrap: AgentBootstrap,
    node: Arc<dyn NodeConnection>,
    executable: String,
    entries: RwLock<HashMap<String, AgentEntry>>,
    mailboxes: RwLock<HashMap<AgentId, Arc<AgentMailbox>>>,
    children: Mutex<Vec<JoinHandle<()>>>,
    log: LogBuffer,
}

impl std::fmt::Debug for AgentHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHost")
            .field("session_id", &self.bootstrap.session.session_id)
            .field("agent_id", &self.bootstrap.agent_id)
            .field("executable", &self.executable)
            .finish()
    }
}

impl AgentHost {
    /// Host for the process described by `bootstrap`, whose own entry is
    /// registered under `executable`.
    pub fn new(
        bootstrap: AgentBootstrap,
        node: Arc<dyn NodeConnection>,
        executable: impl Into<String>,
        log: LogBuffer,
    ) -> Arc<Self> {
        let executable = executable.into();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            bootstrap,
            node,
            executable,
            entries: RwLock::new(HashMap::new()),
            mailboxes: RwLock::new(HashMap::new()),
            children: Mutex::new(Vec::new()),
            log,
        })
    }

    pub fn bootstrap(&self) -> &AgentBootstrap {
        &self.bootstrap
    }

    pub fn node(&self) -> &Arc<dyn NodeConnection> {
        &self.node
    }

    /// Name workers of this process are spawned as.
    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn register_entry(&self, executable: impl Into<String>, entry: AgentEntry) {
        self.entries.write().insert(executable.into(), entry);
    }

    fn entry_for(&self, executable: &str) -> Option<AgentEntry> {
        let entries = self.entries.read();
        if let Some(entry) = entries.get(executable) {
            return Some(entry.clone());
        }
        // Directives may carry a path relative to the deployment directory.
        let file_name = FsPath::new(executable).file_name()?.to_str()?;
        entries.get(file_name).cloned()
    }

    pub fn mailbox(&self, agent_id: AgentId) -> Option<Arc<AgentMailbox>> {
        self.mailboxes.read().get(&agent_id).cloned()
    }

    pub(crate) fn open_mailbox(&self, agent_id: AgentId) -> Arc<AgentMailbox> {
        let mailbox = Arc::new(AgentMailbox::new(self.bootstrap.session.session_id, agent_id));
        self.mailboxes.write().insert(agent_id, mailbox.clone());
        mailbox
    }

    pub(crate) fn close_mailbox(&self, agent_id: AgentId) {
        self.mailboxes.write().remove(&agent_id);
    }

    /// Hand `message` to local agent `agent_id`. `false` if no such agent
    /// lives here or its mailbox is closed.
    pub fn deliver(&self, agent_id: AgentId, message: Message) -> bool {
        match self.mailbox(agent_id) {
            Some(mailbox) => mailbox.enqueue(message),
            None => {
                debug!(agent_id, "No mailbox for delivered message");
                false
            }
        }
    }

    /// Start agent `agent_id` on a new task of this process.
    pub fn spawn_in_process(&self, agent_id: AgentId, executable: &str, args: &[String]) -> std::result::Result<(), String> {
        let host = self.me.upgrade().ok_or_else(|| "agent host is shutting down".to_string())?;
        if self.mailboxes.read().contains_key(&agent_id) {
            return Err(format!("agent {agent_id} is already running in this process"));
        }
        let entry = self
            .entry_for(executable)
            .ok_or_else(|| format!("no agent entry registered for {executable}"))?;
        let bootstrap = self.bootstrap.sibling(agent_id, args.to_vec());
        let agent = Agent::new(bootstrap, host, false);

        let handle = tokio::spawn(async move {
            let agent_id = agent.agent_id();
            if let Err(e) = agent.run(entry).await {
                warn!(agent_id, error = %e, "In-process agent ended with an error");
            }
        });
        self.children.lock().push(handle);
        info!(session_id = %self.bootstrap.session.session_id, agent_id, executable, "In-process agent started");
        Ok(())
    }

    /// In-process agents still running.
    pub fn child_agent_count(&self) -> u32 {
        let mut children = self.children.lock();
        children.retain(|handle| !handle.is_finished());
        u32::try_from(children.len()).unwrap_or(u32::MAX)
    }

    pub fn read_log(&self) -> Vec<String> {
        self.log.lines()
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/agent/{name}/ping", get(ping).post(ping_echo))
            .route("/agent/{name}/messages", post(receive_message))
            .route("/agent/{name}/spawn", post(spawn))
            .route("/agent/{name}/children", get(children))
            .route("/agent/{name}/log", get(read_log))
            .with_state(self)
    }

    /// Serve the host on `bind` and return its base URL.
    pub async fn serve(self: &Arc<Self>, bind: &str) -> Result<String> {
        let listener = TcpListener::bind(bind).await?;
        let local = listener.local_addr()?;
        let app = self.clone().router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Agent host server stopped");
            }
        });
        let url = format!("http://{local}");
        info!(url = %url, "Agent host listening");
        Ok(url)
    }
}

struct HostError(StatusCode, String);

impl IntoResponse for HostError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

fn agent_id_of(name: &str) -> std::result::Result<AgentId, HostError> {
    name.parse::<AgentName>()
        .ok()
        .and_then(|agent| agent.agent_id())
        .ok_or_else(|| HostError(StatusCode::BAD_REQUEST, format!("malformed agent name {name}")))
}

async fn ping() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn ping_echo(Json(body): Json<PingBody>) -> Json<PingBody> {
    Json(body)
}

async fn receive_message(
    State(host): State<Arc<AgentHost>>,
    Path(name): Path<String>,
    Json(message): Json<Message>,
) -> std::result::Result<StatusCode, HostError> {
    let agent_id = agent_id_of(&name)?;
    if host.deliver(agent_id, message) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HostError(StatusCode::NOT_FOUND, format!("agent {name} is not accepting messages")))
    }
}

async fn spawn(
    State(host): State<Arc<AgentHost>>,
    Json(body): Json<InProcessSpawnBody>,
) -> std::result::Result<StatusCode, HostError> {
    host.spawn_in_process(body.agent_id, &body.executable, &body.args)
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| HostError(StatusCode::UNPROCESSABLE_ENTITY, e))
}

async fn children(State(host): State<Arc<AgentHost>>) -> Json<CountBody> {
    Json(CountBody {
        count: host.child_agent_count(),
    })
}

async fn read_log(State(host): State<Arc<AgentHost>>) -> Json<Vec<String>> {
    Json(host.read_log())
}

#[async_trait]
impl AgentEndpoint for AgentHost {
    async fn deliver(&self, agent_id: AgentId, message: Message) -> std::result::Result<(), String> {
        if AgentHost::deliver(self, agent_id, message) {
            Ok(())
        } else {
            Err(format!("agent {agent_id} is not accepting messages"))
        }
    }

    async fn spawn_in_process(&self, agent_id: AgentId, executable: &str, args: &[String]) -> std::result::Result<(), String> {
        AgentHost::spawn_in_process(self, agent_id, executable, args)
    }

    fn child_agent_count(&self) -> u32 {
        AgentHost::child_agent_count(self)
    }

    fn read_log(&self) -> Vec<String> {
        AgentHost::read_log(self)
    }
}
