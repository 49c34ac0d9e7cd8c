// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent identity, read once at the entry point.
//!
//! A process started by a node finds its session, agent id and node URL in
//! the environment. A process started by hand has none of them and becomes
//! the master of a brand new session.

use std::collections::HashMap;

use visor_core::domain::session::{AgentId, SessionId, SessionInfo, MASTER_AGENT_ID};
use visor_core::infrastructure::process::{ENV_AGENT_ID, ENV_NODE_URL, ENV_SESSION_ID};

use crate::error::{Result, SdkError};

pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1:8700";

#[derive(Debug, Clone, PartialEq)]
pub struct AgentBootstrap {
    pub session: SessionInfo,
    pub agent_id: AgentId,
    pub node_url: String,
    pub args: Vec<String>,
}

impl AgentBootstrap {
    /// New session with this process as its master.
    pub fn master(process_name: impl Into<String>, args: &[String], node_url: impl Into<String>) -> Self {
        Self {
            session: SessionInfo::new(SessionId::new(), process_name, args.join(" ")),
            agent_id: MASTER_AGENT_ID,
            node_url: node_url.into(),
            args: args.to_vec(),
        }
    }

    /// Worker `agent_id` of an existing session.
    pub fn worker(session: SessionInfo, agent_id: AgentId, node_url: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            session,
            agent_id,
            node_url: node_url.into(),
            args,
        }
    }

    /// Identity from the process environment and command line.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::from_vars(&vars, &process_name(), &args)
    }

    pub fn from_vars(vars: &HashMap<String, String>, process_name: &str, args: &[String]) -> Result<Self> {
        let node_url = vars
            .get(ENV_NODE_URL)
            .cloned()
            .unwrap_or_else(|| DEFAULT_NODE_URL.to_string());

        let Some(raw_session) = vars.get(ENV_SESSION_ID) else {
            return Ok(Self::master(process_name, args, node_url));
        };
        let session_id: SessionId = raw_session.parse().map_err(|_| SdkError::Bootstrap {
            name: ENV_SESSION_ID,
            value: raw_session.clone(),
        })?;
        let raw_agent = vars.get(ENV_AGENT_ID).cloned().unwrap_or_default();
        let agent_id: AgentId = raw_agent.parse().map_err(|_| SdkError::Bootstrap {
            name: ENV_AGENT_ID,
            value: raw_agent.clone(),
        })?;

        let session = SessionInfo::new(session_id, process_name, args.join(" "));
        Ok(Self::worker(session, agent_id, node_url, args.to_vec()))
    }

    pub fn is_master(&self) -> bool {
        self.agent_id == MASTER_AGENT_ID
    }

    /// Bootstrap of an agent hosted in this same process.
    pub fn sibling(&self, agent_id: AgentId, args: Vec<String>) -> Self {
        Self::worker(self.session.clone(), agent_id, self.node_url.clone(), args)
    }
}

/// File name of the running executable, which is also what workers are
/// launched as.
pub fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "agent".to_string())
}
