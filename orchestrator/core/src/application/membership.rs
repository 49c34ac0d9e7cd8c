// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Membership Registry
//!
//! Durable, reconciled view of every node this node has ever heard of. Entries
//! are appended or updated, never removed; a node that goes away is marked
//! inactive so its capacity is remembered.
//!
//! Membership is symmetric: there is no leader. At startup a node pulls the
//! view of one reachable peer, reconciles it with its own persisted registry
//! and then announces itself to every active peer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::application::fanout;
use crate::domain::cluster::{upsert_node, ClusterNode, NodeAddress};
use crate::domain::repository::ClusterRegistryStore;
use crate::domain::transport::ClusterClient;

pub struct ClusterMembershipRegistry {
    self_node: ClusterNode,
    seeds: Vec<NodeAddress>,
    nodes: Mutex<Vec<ClusterNode>>,
    store: Arc<dyn ClusterRegistryStore>,
    cluster: Arc<dyn ClusterClient>,
    notify_timeout: Duration,
}

impl ClusterMembershipRegistry {
    pub fn new(
        self_node: ClusterNode,
        seeds: Vec<NodeAddress>,
        store: Arc<dyn ClusterRegistryStore>,
        cluster: Arc<dyn ClusterClient>,
        notify_timeout: Duration,
    ) -> Self {
        let nodes = vec![self_node.clone()];
        Self {
            self_node,
            seeds,
            nodes: Mutex::new(nodes),
            store,
            cluster,
            notify_timeout,
        }
    }

    pub fn self_address(&self) -> &NodeAddress {
        &self.self_node.address
    }

    pub fn self_node(&self) -> &ClusterNode {
        &self.self_node
    }

    /// Join the cluster. Runs once at startup.
    ///
    /// The peer view is fetched before the registry lock is taken, so two nodes
    /// starting together cannot wait on each other.
    pub async fn register_instance(&self) {
        let mut known = match self.store.load().await {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(error = %e, "Failed to load cluster registry, starting from self only");
                Vec::new()
            }
        };
        upsert_node(&mut known, self.self_node.clone());
        let view = self.fetch_remote_view(&known).await;

        let peers = {
            let mut nodes = self.nodes.lock().await;
            reconcile(&mut known, view.as_deref(), &self.self_node);
            // Peers that announced themselves while the view was being fetched stay active.
            for announced in nodes.iter().filter(|n| **n != self.self_node && n.is_active) {
                upsert_node(&mut known, announced.clone());
            }
            *nodes = known;
            self.persist(&nodes).await;
            active_peers(&nodes, self.self_address())
        };

        info!(
            node = %self.self_node.address,
            peers = peers.len(),
            "Registered node instance with cluster"
        );
        let me = self.self_node.clone();
        let cluster = self.cluster.clone();
        let handles = fanout::notify_each(peers, "register_cluster_node", move |peer| {
            let cluster = cluster.clone();
            let me = me.clone();
            async move { cluster.register_node(&peer, &me).await }
        });
        fanout::await_all(handles, self.notify_timeout, "register_cluster_node").await;
    }

    /// Leave the cluster: mark self inactive, persist and tell every active peer.
    pub async fn unregister_instance(&self) {
        let departing = self.self_node.deactivated();
        let peers = {
            let mut nodes = self.nodes.lock().await;
            upsert_node(&mut nodes, departing.clone());
            self.persist(&nodes).await;
            active_peers(&nodes, self.self_address())
        };

        info!(node = %departing.address, peers = peers.len(), "Unregistering node instance from cluster");
        let cluster = self.cluster.clone();
        let handles = fanout::notify_each(peers, "unregister_cluster_node", move |peer| {
            let cluster = cluster.clone();
            let departing = departing.clone();
            async move { cluster.unregister_node(&peer, &departing).await }
        });
        fanout::await_all(handles, self.notify_timeout, "unregister_cluster_node").await;
    }

    /// A peer announced itself (or changed capacity). Registering always marks
    /// the node active, whatever `is_active` it was sent with.
    pub async fn register_node(&self, info: ClusterNode) {
        let mut nodes = self.nodes.lock().await;
        info!(node = %info.address, processors = info.processor_count, "Cluster node registered");
        upsert_node(&mut nodes, ClusterNode { is_active: true, ..info });
        self.persist(&nodes).await;
    }

    /// A peer left. The entry stays, inactive.
    pub async fn unregister_node(&self, info: ClusterNode) {
        if info.address == self.self_node.address {
            warn!(node = %info.address, "Ignoring request to deactivate this node");
            return;
        }
        let mut nodes = self.nodes.lock().await;
        let departed = match nodes.iter().find(|n| **n == info) {
            Some(existing) => existing.deactivated(),
            None => info.deactivated(),
        };
        info!(node = %departed.address, "Cluster node unregistered");
        upsert_node(&mut nodes, departed);
        self.persist(&nodes).await;
    }

    /// Snapshot of the registry in order.
    pub async fn list_nodes(&self) -> Vec<ClusterNode> {
        self.nodes.lock().await.clone()
    }

    /// Addresses of every active node other than this one.
    pub async fn active_peers(&self) -> Vec<NodeAddress> {
        active_peers(&self.nodes.lock().await, self.self_address())
    }

    async fn fetch_remote_view(&self, known: &[ClusterNode]) -> Option<Vec<ClusterNode>> {
        let mut candidates: Vec<NodeAddress> = self.seeds.clone();
        for node in known {
            if !candidates.contains(&node.address) {
                candidates.push(node.address.clone());
            }
        }
        candidates.retain(|a| a != self.self_address());

        for candidate in candidates {
            match self.cluster.list_nodes(&candidate).await {
                Ok(view) => {
                    info!(node = %candidate, nodes = view.len(), "Fetched cluster view");
                    return Some(view);
                }
                Err(e) => warn!(node = %candidate, error = %e, "Cluster node unreachable at startup"),
            }
        }
        None
    }

    async fn persist(&self, nodes: &[ClusterNode]) {
        if let Err(e) = self.store.save(nodes).await {
            error!(error = %e, "Failed to persist cluster registry");
        }
    }
}

fn active_peers(nodes: &[ClusterNode], self_address: &NodeAddress) -> Vec<NodeAddress> {
    nodes
        .iter()
        .filter(|n| n.is_active && &n.address != self_address)
        .map(|n| n.address.clone())
        .collect()
}

/// Merge a peer's view into `known`.
///
/// Nodes absent from `view` (or every node, when no view could be fetched) are
/// marked inactive; self always ends up present and active.
fn reconcile(known: &mut Vec<ClusterNode>, view: Option<&[ClusterNode]>, self_node: &ClusterNode) {
    match view {
        Some(view) => {
            for remote in view.iter().filter(|n| *n != self_node) {
                upsert_node(known, remote.clone());
            }
            for node in known.iter_mut() {
                if node != self_node && !view.contains(node) {
                    node.is_active = false;
                }
            }
        }
        None => {
            for node in known.iter_mut().filter(|n| *n != self_node) {
                node.is_active = false;
            }
        }
    }
    upsert_node(known, self_node.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str, active: bool) -> ClusterNode {
        let mut n = ClusterNode::new(addr.parse().unwrap(), 4, addr);
        n.is_active = active;
        n
    }

    #[test]
    fn test_reconcile_with_remote_view() {
        let me = node("self:1", true);
        let mut known = vec![node("old:1", true), me.clone(), node("b:1", false)];
        let view = vec![node("b:1", true), node("c:1", true), node("self:1", false)];

        reconcile(&mut known, Some(&view), &me);

        let summary: Vec<(&str, bool)> = known.iter().map(|n| (n.address.as_str(), n.is_active)).collect();
        assert_eq!(
            summary,
            vec![("old:1", false), ("self:1", true), ("b:1", true), ("c:1", true)]
        );
    }

    #[test]
    fn test_reconcile_without_view_deactivates_but_keeps_peers() {
        let me = node("self:1", true);
        let mut known = vec![node("a:1", true), node("b:1", true)];

        reconcile(&mut known, None, &me);

        assert_eq!(known.len(), 3);
        assert!(known.iter().filter(|n| **n != me).all(|n| !n.is_active));
        assert!(known.iter().any(|n| *n == me && n.is_active));
    }

    #[tokio::test]
    async fn test_registered_node_is_active() {
        let cluster = Arc::new(crate::application::testing::RecordingCluster::default());
        let registry = crate::application::testing::membership("self:1", &[], cluster).await;

        registry.register_node(node("b:1", false)).await;
        registry.unregister_node(node("b:1", true)).await;
        registry.register_node(node("b:1", false)).await;

        let nodes = registry.list_nodes().await;
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.is_active));
    }
}
