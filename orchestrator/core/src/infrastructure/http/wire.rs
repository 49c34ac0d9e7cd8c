// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! JSON bodies and route paths shared by the node server, the node's HTTP
//! clients and the agent SDK.
//!
//! | Surface | Prefix | Served by |
//! |---------|--------|-----------|
//! | node to node | `/cluster` | node daemon |
//! | agent to node | `/local` | node daemon |
//! | node to agent | `/agent/{name}` | agent host (SDK) |

use serde::{Deserialize, Serialize};

use crate::domain::cluster::NodeAddress;
use crate::domain::session::{AgentId, SessionId, SessionInfo};

pub const HEALTH: &str = "/health";

pub const CLUSTER_SPAWN: &str = "/cluster/spawn";
pub const CLUSTER_AGENTS: &str = "/cluster/agents";
pub const CLUSTER_NODES: &str = "/cluster/nodes";
pub const CLUSTER_NODES_UNREGISTER: &str = "/cluster/nodes/unregister";
pub const CLUSTER_MESSAGES: &str = "/cluster/messages";
pub const CLUSTER_INFO: &str = "/cluster/info";

pub const LOCAL_PING: &str = "/local/ping";
pub const LOCAL_SPAWN: &str = "/local/spawn";
pub const LOCAL_SEND: &str = "/local/send";
pub const LOCAL_BROADCAST: &str = "/local/broadcast";
pub const LOCAL_MASTER: &str = "/local/master";
pub const LOCAL_ATTACH: &str = "/local/attach";

pub fn cluster_agent(session_id: SessionId, agent_id: AgentId) -> String {
    format!("/cluster/sessions/{}/agents/{}", session_id, agent_id)
}

pub fn cluster_session(session_id: SessionId) -> String {
    format!("/cluster/sessions/{}", session_id)
}

pub fn local_agent(session_id: SessionId, agent_id: AgentId) -> String {
    format!("/local/sessions/{}/agents/{}", session_id, agent_id)
}

pub fn local_agents(session_id: SessionId) -> String {
    format!("/local/sessions/{}/agents", session_id)
}

pub fn local_session(session_id: SessionId) -> String {
    format!("/local/sessions/{}", session_id)
}

pub fn agent_path(name: &str, leaf: &str) -> String {
    format!("/agent/{}/{}", name, leaf)
}

pub const AGENT_PING: &str = "ping";
pub const AGENT_MESSAGES: &str = "messages";
pub const AGENT_SPAWN: &str = "spawn";
pub const AGENT_CHILDREN: &str = "children";
pub const AGENT_LOG: &str = "log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentBody {
    pub session: SessionInfo,
    pub agent_id: AgentId,
    pub location: NodeAddress,
}

/// Spawn ask from a local agent. `strategy` 0 deals `count` workers round-robin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnBody {
    pub session: SessionInfo,
    pub count: u16,
    pub executable: String,
    #[serde(
        default,
        with = "crate::domain::spawn::package_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub package: Option<Vec<u8>>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub strategy: i32,
    #[serde(default)]
    pub factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterBody {
    pub session: SessionInfo,
}

/// Registers the HTTP endpoint of a freshly started agent host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachAgentBody {
    pub session_id: SessionId,
    pub agent_id: AgentId,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProcessSpawnBody {
    pub agent_id: AgentId,
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PingBody {
    pub echo: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AcceptedBody {
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CountBody {
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let sid: SessionId = "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();
        assert_eq!(
            cluster_agent(sid, 3),
            "/cluster/sessions/67e55044-10b1-426f-9247-bb680e5fe0c8/agents/3"
        );
        assert_eq!(agent_path("3-x", AGENT_MESSAGES), "/agent/3-x/messages");
    }

    #[test]
    fn test_spawn_body_defaults() {
        let body: SpawnBody = serde_json::from_value(serde_json::json!({
            "session": {
                "session_id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
                "process_name": "master",
                "created_at": "2026-01-01T00:00:00Z"
            },
            "count": 2,
            "executable": "worker",
            "package": "AQID"
        }))
        .unwrap();
        assert_eq!(body.strategy, 0);
        assert!(body.args.is_empty());
        assert_eq!(body.package, Some(vec![1, 2, 3]));
    }
}
