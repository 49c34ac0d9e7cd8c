// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Membership Types
//!
//! - [`NodeAddress`]: `host:port` of a node daemon, used as its identity.
//! - [`ClusterNode`]: one registry entry: address, capacity and active flag.
//!
//! Registry entries are never removed, only marked inactive, so the capacity
//! of nodes that went away is still known when they come back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Node address '{0}' must be in host:port form")]
    MissingPort(String),

    #[error("Node address '{0}' has an invalid port")]
    InvalidPort(String),
}

/// Network address of a cluster node (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base URL of the node's HTTP surface.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.0)
    }
}

impl FromStr for NodeAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(trimmed.to_string()))?;
        if host.is_empty() {
            return Err(AddressError::MissingPort(trimmed.to_string()));
        }
        match port.parse::<u16>() {
            Ok(p) if p > 0 => Ok(Self(trimmed.to_string())),
            _ => Err(AddressError::InvalidPort(trimmed.to_string())),
        }
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(address: NodeAddress) -> Self {
        address.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node known to the cluster registry.
///
/// Equality is by address only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub address: NodeAddress,
    /// Logical processor count, the input to capacity based spawn strategies.
    pub processor_count: u16,
    pub machine_name: String,
    pub is_active: bool,
}

impl ClusterNode {
    pub fn new(address: NodeAddress, processor_count: u16, machine_name: impl Into<String>) -> Self {
        Self {
            address,
            processor_count,
            machine_name: machine_name.into(),
            is_active: true,
        }
    }

    /// Copy of this entry with the active flag cleared.
    pub fn deactivated(&self) -> Self {
        Self {
            is_active: false,
            ..self.clone()
        }
    }
}

impl PartialEq for ClusterNode {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ClusterNode {}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.address, self.processor_count)
    }
}

/// Insert `node` or replace the entry with the same address, keeping registry order.
pub fn upsert_node(nodes: &mut Vec<ClusterNode>, node: ClusterNode) {
    match nodes.iter_mut().find(|n| **n == node) {
        Some(existing) => *existing = node,
        None => nodes.push(node),
    }
}
