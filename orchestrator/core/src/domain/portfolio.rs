// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Portfolio Aggregate
//!
//! A node's bookkeeping for one session: where every known agent of the
//! session lives, which of them are hosted here, and the single OS process
//! (if any) this node started for the session.
//!
//! The *host* is the agent whose process accepts in-process spawns for the
//! session on this node: the master on the master's node, otherwise the first
//! agent this node launched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::cluster::NodeAddress;
use crate::domain::runtime::AgentProcess;
use crate::domain::session::{is_addressable, AgentId, AgentName, SessionId, SessionInfo};

/// Where an agent of a session lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLocation {
    pub session: SessionInfo,
    pub agent_id: AgentId,
    pub node: NodeAddress,
}

impl AgentLocation {
    pub fn new(session: SessionInfo, agent_id: AgentId, node: NodeAddress) -> Self {
        Self {
            session,
            agent_id,
            node,
        }
    }
}

impl PartialEq for AgentLocation {
    fn eq(&self, other: &Self) -> bool {
        self.agent_id == other.agent_id
            && self.session.session_id == other.session.session_id
            && self.node == other.node
    }
}

impl Eq for AgentLocation {}

#[derive(Debug)]
pub struct SessionPortfolio {
    session: SessionInfo,
    local_ids: BTreeSet<AgentId>,
    locations: BTreeMap<AgentId, AgentLocation>,
    process: Option<Box<dyn AgentProcess>>,
    host: Option<AgentName>,
    deployment: Option<PathBuf>,
}

impl SessionPortfolio {
    pub fn new(session: SessionInfo) -> Self {
        Self {
            session,
            local_ids: BTreeSet::new(),
            locations: BTreeMap::new(),
            process: None,
            host: None,
            deployment: None,
        }
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session.session_id
    }

    /// Upsert the location of a (possibly remote) agent. Returns false for the
    /// broadcast id, which is never recorded.
    pub fn register(&mut self, location: AgentLocation) -> bool {
        if !is_addressable(location.agent_id) {
            return false;
        }
        self.locations.insert(location.agent_id, location);
        true
    }

    /// Upsert an agent hosted on this node.
    pub fn register_local(&mut self, location: AgentLocation) -> bool {
        let agent_id = location.agent_id;
        if !self.register(location) {
            return false;
        }
        self.local_ids.insert(agent_id);
        true
    }

    /// Forget an agent. Returns whether it was known.
    pub fn unregister(&mut self, agent_id: AgentId) -> bool {
        let local = self.local_ids.remove(&agent_id);
        self.locations.remove(&agent_id).is_some() || local
    }

    pub fn is_local(&self, agent_id: AgentId) -> bool {
        self.local_ids.contains(&agent_id)
    }

    pub fn location(&self, agent_id: AgentId) -> Option<&AgentLocation> {
        self.locations.get(&agent_id)
    }

    pub fn local_ids(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.local_ids.iter().copied()
    }

    pub fn locations(&self) -> impl Iterator<Item = &AgentLocation> {
        self.locations.values()
    }

    /// Name of the in-process spawn host for this session on this node.
    pub fn host(&self) -> Option<&AgentName> {
        self.host.as_ref()
    }

    pub fn set_host(&mut self, host: AgentName) {
        self.host = Some(host);
    }

    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    /// Take ownership of the process launched for `host`.
    pub fn attach_process(&mut self, process: Box<dyn AgentProcess>, host: AgentName) {
        self.process = Some(process);
        self.host = Some(host);
    }

    pub fn take_process(&mut self) -> Option<Box<dyn AgentProcess>> {
        self.process.take()
    }

    pub fn deployment(&self) -> Option<&Path> {
        self.deployment.as_deref()
    }

    pub fn set_deployment(&mut self, dir: PathBuf) {
        self.deployment = Some(dir);
    }

    /// True when the portfolio records nothing and owns nothing.
    pub fn is_vacant(&self) -> bool {
        self.locations.is_empty()
            && self.local_ids.is_empty()
            && self.process.is_none()
            && self.host.is_none()
            && self.deployment.is_none()
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            session_id: self.session.session_id,
            local_ids: self.local_ids.iter().copied().collect(),
            locations: self
                .locations
                .values()
                .map(|l| (l.agent_id, l.node.clone()))
                .collect(),
            host: self.host.clone(),
            has_process: self.process.is_some(),
        }
    }
}

/// Copy of a portfolio's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub session_id: SessionId,
    pub local_ids: Vec<AgentId>,
    pub locations: Vec<(AgentId, NodeAddress)>,
    pub host: Option<AgentName>,
    pub has_process: bool,
}
