// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Spawn Requests and Directive Planning
//!
//! An *original ask* ([`SpawnRequest::is_directive`] == false) is expanded by the
//! node that received it into one *directive* per agent to start. Every
//! directive has `count == 1` and names its agent through `offset + count`.
//!
//! Two expansion modes exist:
//!
//! - **Plain** (strategy `<= 0`): `count` directives dealt round-robin over the
//!   active nodes, starting at the node right after this one.
//! - **Capacity** (strategies 1-6): every active node gets
//!   [`SpawnStrategy::agents_per_node`] directives, in registry order.
//!
//! In both modes a node receives the package bytes on its first directive only.
//! [`plan_directives`] is pure; sending the plan is the scheduler's business.

use crate::domain::cluster::{ClusterNode, NodeAddress};
use crate::domain::session::{AgentId, SessionInfo, BROADCAST_AGENT_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub session: SessionInfo,
    pub count: u16,
    pub executable: String,
    /// Deployable package (tar archive). Base64 on the wire.
    #[serde(default, with = "package_bytes", skip_serializing_if = "Option::is_none")]
    pub package: Option<Vec<u8>>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub strategy: i32,
    #[serde(default)]
    pub factor: f64,
    #[serde(default)]
    pub offset: u16,
    #[serde(default)]
    pub is_directive: bool,
}

impl SpawnRequest {
    /// Plain-count ask for `count` workers.
    pub fn new(
        session: SessionInfo,
        count: u16,
        executable: impl Into<String>,
        package: Option<Vec<u8>>,
        args: Vec<String>,
    ) -> Self {
        Self {
            session,
            count,
            executable: executable.into(),
            package,
            args,
            strategy: 0,
            factor: 0.0,
            offset: 0,
            is_directive: false,
        }
    }

    pub fn with_strategy(mut self, strategy: i32, factor: f64) -> Self {
        self.strategy = strategy;
        self.factor = factor;
        self
    }

    /// Agent id a directive spawns.
    pub fn target_agent_id(&self) -> AgentId {
        self.offset.saturating_add(self.count)
    }

    /// Single-agent directive derived from this ask.
    fn directive(&self, offset: u16, package: Option<Vec<u8>>) -> Self {
        Self {
            session: self.session.clone(),
            count: 1,
            executable: self.executable.clone(),
            package,
            args: self.args.clone(),
            strategy: self.strategy,
            factor: self.factor,
            offset,
            is_directive: true,
        }
    }
}

/// Sizing strategy of an original ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStrategy {
    /// Plain round-robin of `count` agents.
    Plain,
    OnePerNode,
    OnePerProcessor,
    OneLessThanProcessors,
    /// Processors minus `factor` (whole agents).
    ProcessorsMinusFactor,
    /// Processors times `factor`.
    ProcessorsTimesFactor,
    /// `factor` agents per node regardless of processors.
    FactorPerNode,
    /// Unknown strategy id; sized like [`SpawnStrategy::OnePerProcessor`].
    Other(i32),
}

impl SpawnStrategy {
    pub fn from_id(id: i32) -> Self {
        match id {
            i32::MIN..=0 => Self::Plain,
            1 => Self::OnePerNode,
            2 => Self::OnePerProcessor,
            3 => Self::OneLessThanProcessors,
            4 => Self::ProcessorsMinusFactor,
            5 => Self::ProcessorsTimesFactor,
            6 => Self::FactorPerNode,
            other => Self::Other(other),
        }
    }

    /// Number of directives one node of `processors` logical processors receives.
    ///
    /// Always at least 1 for capacity strategies, except strategy 2 (and unknown
    /// ids) on a node reporting zero processors.
    pub fn agents_per_node(&self, processors: u16, factor: f64) -> u32 {
        let p = f64::from(processors);
        let sized = match self {
            Self::Plain | Self::OnePerNode => 1.0,
            Self::OnePerProcessor | Self::Other(_) => return u32::from(processors),
            Self::OneLessThanProcessors => p - 1.0,
            Self::ProcessorsMinusFactor => {
                let f = clamp(factor, 0.0, (p - 1.0).max(0.0));
                p - f.floor()
            }
            Self::ProcessorsTimesFactor => {
                let f = clamp(factor, 0.1, (p * 10.0).max(0.1));
                (p * f).round()
            }
            Self::FactorPerNode => {
                let f = if factor <= 0.0 { 1.0 } else { factor };
                clamp(f, 0.0, (p * 10.0).max(1.0)).floor()
            }
        };
        // Saturating float-to-int cast; NaN becomes 0 and is lifted to 1.
        (sized as u32).max(1)
    }
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.max(min).min(max)
}

/// One directive bound to its destination node.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDirective {
    pub node: NodeAddress,
    pub request: SpawnRequest,
}

/// Expand an original ask into per-node directives.
///
/// `nodes` is the registry in order; inactive entries are skipped. Planning
/// stops early rather than hand out the broadcast id.
pub fn plan_directives(
    request: &SpawnRequest,
    nodes: &[ClusterNode],
    self_address: &NodeAddress,
) -> Vec<PlannedDirective> {
    match SpawnStrategy::from_id(request.strategy) {
        SpawnStrategy::Plain => plan_round_robin(request, nodes, self_address),
        strategy => plan_by_capacity(request, strategy, nodes),
    }
}

fn plan_round_robin(
    request: &SpawnRequest,
    nodes: &[ClusterNode],
    self_address: &NodeAddress,
) -> Vec<PlannedDirective> {
    let Some(mut index) = round_robin_start(nodes, self_address) else {
        return Vec::new();
    };

    let mut planned = Vec::with_capacity(usize::from(request.count));
    let mut packaged: HashSet<usize> = HashSet::new();
    for i in 0..request.count {
        let Some(offset) = issuable_offset(request.offset, i) else {
            break;
        };
        let package = if packaged.insert(index) {
            request.package.clone()
        } else {
            None
        };
        planned.push(PlannedDirective {
            node: nodes[index].address.clone(),
            request: request.directive(offset, package),
        });
        index = next_active(nodes, index).unwrap_or(index);
    }
    planned
}

fn plan_by_capacity(
    request: &SpawnRequest,
    strategy: SpawnStrategy,
    nodes: &[ClusterNode],
) -> Vec<PlannedDirective> {
    let mut planned = Vec::new();
    let mut increment: u16 = 0;
    for node in nodes.iter().filter(|n| n.is_active) {
        let per_node = strategy.agents_per_node(node.processor_count, request.factor);
        for i in 0..per_node {
            let Some(offset) = issuable_offset(request.offset, increment) else {
                return planned;
            };
            let package = if i == 0 { request.package.clone() } else { None };
            planned.push(PlannedDirective {
                node: node.address.clone(),
                request: request.directive(offset, package),
            });
            increment += 1;
        }
    }
    planned
}

/// Offset for the `i`-th directive, or `None` when its agent id would not be a
/// valid worker id.
fn issuable_offset(base: u16, i: u16) -> Option<u16> {
    let offset = base.checked_add(i)?;
    match offset.checked_add(1) {
        Some(target) if target < BROADCAST_AGENT_ID => Some(offset),
        _ => None,
    }
}

/// First active node after `self_address` in registry order (wrapping). When no
/// other node is active this is self, when nothing is active it is `None`.
fn round_robin_start(nodes: &[ClusterNode], self_address: &NodeAddress) -> Option<usize> {
    let self_index = nodes.iter().position(|n| &n.address == self_address);
    let first_other = match self_index {
        Some(idx) => next_active(nodes, idx).filter(|&next| next != idx),
        None => nodes.iter().position(|n| n.is_active),
    };
    first_other.or_else(|| nodes.iter().position(|n| n.is_active))
}

/// Next active index after `from`, wrapping once around the registry.
fn next_active(nodes: &[ClusterNode], from: usize) -> Option<usize> {
    let len = nodes.len();
    (1..=len)
        .map(|step| (from + step) % len)
        .find(|&idx| nodes[idx].is_active)
}

/// Serde adapter carrying package bytes as base64 text.
pub mod package_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
