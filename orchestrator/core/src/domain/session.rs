// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Domain Types
//!
//! A **Session** is one end-to-end distributed execution: exactly one master
//! agent plus the workers it spawns across the cluster.
//!
//! - [`SessionId`]: UUID newtype identifying a session.
//! - [`SessionInfo`]: immutable session descriptor carried by value in every
//!   cross-node call that needs it.
//! - [`AgentId`]: 16-bit agent identifier, unique within a session.
//! - [`AgentName`]: the bootstrap name `"{agentId}-{sessionId}"` used to address
//!   an agent endpoint on its hosting node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Agent identifier within a session.
///
/// `0` is the master, `65535` is the broadcast sentinel and never a real agent,
/// `1..=65534` are workers.
pub type AgentId = u16;

/// The master agent of every session.
pub const MASTER_AGENT_ID: AgentId = u16::MIN;

/// Destination id meaning "every agent in the session except the sender".
pub const BROADCAST_AGENT_ID: AgentId = u16::MAX;

/// Returns true when `id` can name a real agent (i.e. is not the broadcast sentinel).
pub fn is_addressable(id: AgentId) -> bool {
    id != BROADCAST_AGENT_ID
}

/// Unique identifier for a [`SessionInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new random `SessionId`.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Immutable descriptor of a distributed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    /// Name of the process that created the session (the master executable).
    pub process_name: String,
    /// Launch arguments of the master, joined with spaces.
    #[serde(default)]
    pub arguments: String,
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(session_id: SessionId, process_name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            session_id,
            process_name: process_name.into(),
            arguments: arguments.into(),
            created_at: Utc::now(),
        }
    }
}

/// Bootstrap name of an agent on its hosting node: `"{agentId}-{sessionId}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentName(String);

impl AgentName {
    pub fn new(agent_id: AgentId, session_id: SessionId) -> Self {
        Self(format!("{}-{}", agent_id, session_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Agent id encoded in the name, if well formed.
    pub fn agent_id(&self) -> Option<AgentId> {
        self.0.split_once('-').and_then(|(id, _)| id.parse().ok())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.0.split_once('-').and_then(|(_, sid)| sid.parse().ok())
    }
}

impl FromStr for AgentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, sid) = s.split_once('-').ok_or_else(|| format!("malformed agent name: {s}"))?;
        let agent_id: AgentId = id.parse().map_err(|_| format!("malformed agent id in {s}"))?;
        let session_id: SessionId = sid.parse().map_err(|_| format!("malformed session id in {s}"))?;
        Ok(Self::new(agent_id, session_id))
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
