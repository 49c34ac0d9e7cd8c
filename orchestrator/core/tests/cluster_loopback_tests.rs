// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Multi-node scenarios over the in-process loopback transport.
//!
//! Three nodes `n0:1`, `n1:1`, `n2:1` join in that order, each seeded with the
//! first. The master agent of every session lives on `n0:1`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use visor_core::application::{NodeDependencies, NodeSettings, NodeVisor};
use visor_core::domain::cluster::{ClusterNode, NodeAddress};
use visor_core::domain::message::Message;
use visor_core::domain::session::{AgentName, SessionId, SessionInfo};
use visor_core::infrastructure::loopback::{InMemoryAgentEndpoint, LoopbackCluster, LoopbackLauncher};
use visor_core::infrastructure::package::pack_directory;
use visor_core::infrastructure::repositories::InMemoryClusterRegistryStore;

struct TestCluster {
    loopback: Arc<LoopbackCluster>,
    nodes: Vec<Arc<NodeVisor>>,
    launchers: Vec<Arc<LoopbackLauncher>>,
    apps: TempDir,
}

fn addr(s: &str) -> NodeAddress {
    s.parse().unwrap()
}

fn settings(address: &str, seeds: Vec<NodeAddress>, apps: &TempDir) -> NodeSettings {
    NodeSettings {
        self_node: ClusterNode::new(addr(address), 4, address.replace(':', "-")),
        seeds,
        apps_dir: apps.path().join(address.replace(':', "-")),
        notify_timeout: Duration::from_secs(5),
        node_url: format!("http://{}", address),
    }
}

async fn start_cluster(addresses: &[&str]) -> TestCluster {
    let loopback = LoopbackCluster::new();
    let apps = tempfile::tempdir().unwrap();
    let mut nodes = Vec::new();
    let mut launchers = Vec::new();
    for (i, address) in addresses.iter().enumerate() {
        let seeds = if i == 0 { Vec::new() } else { vec![addr(addresses[0])] };
        let launcher = Arc::new(LoopbackLauncher::new(loopback.clone()));
        let node = Arc::new(NodeVisor::new(
            settings(address, seeds, &apps),
            NodeDependencies {
                registry_store: Arc::new(InMemoryClusterRegistryStore::new()),
                cluster: loopback.clone(),
                agents: loopback.clone(),
                launcher: launcher.clone(),
            },
        ));
        loopback.attach_node(&node);
        node.start().await;
        nodes.push(node);
        launchers.push(launcher);
    }
    TestCluster {
        loopback,
        nodes,
        launchers,
        apps,
    }
}

async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Start a session whose master (agent 0) is hosted on node 0.
async fn start_master(cluster: &TestCluster) -> (SessionInfo, Arc<InMemoryAgentEndpoint>) {
    let session = SessionInfo::new(SessionId::new(), "master", "--demo");
    let master = InMemoryAgentEndpoint::new();
    cluster
        .loopback
        .attach_agent(AgentName::new(0, session.session_id), master.clone());
    cluster.nodes[0].register_master_agent(&session).await;
    (session, master)
}

/// Spawn five plain workers and wait until every node knows all six agents.
async fn spawn_five(cluster: &TestCluster, session: &SessionInfo) {
    assert!(cluster.nodes[0].spawn(session.clone(), 5, "worker".to_string(), None, vec![]));
    let sid = session.session_id;
    let converged = eventually(|| {
        cluster
            .nodes
            .iter()
            .all(|n| n.running_agents(sid) == vec![0, 1, 2, 3, 4, 5])
    })
    .await;
    assert!(converged, "agents did not converge on every node");
}

/// Endpoint of the worker process node `node` launched for `agent_id`.
fn process(cluster: &TestCluster, node: usize, agent_id: u16, sid: SessionId) -> Arc<InMemoryAgentEndpoint> {
    cluster.launchers[node].process_endpoint(sid, agent_id).unwrap()
}

#[tokio::test]
async fn test_membership_converges() {
    let cluster = start_cluster(&["n0:1", "n1:1", "n2:1"]).await;

    for node in &cluster.nodes {
        let nodes = node.list_nodes().await;
        assert_eq!(nodes.len(), 3, "node {} sees {:?}", node.address(), nodes);
        assert!(nodes.iter().all(|n| n.is_active));
    }
    let order: Vec<String> = cluster.nodes[0]
        .list_nodes()
        .await
        .iter()
        .map(|n| n.address.to_string())
        .collect();
    assert_eq!(order, vec!["n0:1", "n1:1", "n2:1"]);
}

#[tokio::test]
async fn test_round_robin_spawn_places_agents_after_self() {
    let cluster = start_cluster(&["n0:1", "n1:1", "n2:1"]).await;
    let (session, master) = start_master(&cluster).await;
    let sid = session.session_id;

    spawn_five(&cluster, &session).await;

    // n1 hosts 1 and 4, n2 hosts 2 and 5, n0 hosts 3 inside the master process.
    let local = |i: usize| cluster.nodes[i].portfolio_snapshot(sid).unwrap().local_ids;
    assert_eq!(local(0), vec![0, 3]);
    assert_eq!(local(1), vec![1, 4]);
    assert_eq!(local(2), vec![2, 5]);
    assert_eq!(master.children(), vec![3]);

    // One process per remote node, hosting the first agent placed there.
    let launched: Vec<u16> = cluster
        .launchers
        .iter()
        .flat_map(|l| l.launched())
        .map(|spec| spec.agent_id)
        .collect();
    assert_eq!(launched, vec![1, 2]);
    assert!(cluster.launchers[0].launched().is_empty());
}

#[tokio::test]
async fn test_back_to_back_spawns_get_distinct_ids() {
    let cluster = start_cluster(&["n0:1"]).await;
    let (session, master) = start_master(&cluster).await;
    let sid = session.session_id;

    // Both asks are queued before the first one is planned.
    assert!(cluster.nodes[0].spawn(session.clone(), 2, "worker".to_string(), None, vec![]));
    assert!(cluster.nodes[0].spawn(session.clone(), 2, "worker".to_string(), None, vec![]));

    assert!(eventually(|| cluster.nodes[0].running_agents(sid) == vec![0, 1, 2, 3, 4]).await);
    let mut children = master.children();
    children.sort_unstable();
    assert_eq!(children, vec![1, 2, 3, 4]);

    // Ids stay reserved after the agents leave.
    cluster.nodes[0].unregister_local_agent(sid, 4).await;
    assert!(cluster.nodes[0].spawn(session.clone(), 1, "worker".to_string(), None, vec![]));
    assert!(eventually(|| cluster.nodes[0].running_agents(sid) == vec![0, 1, 2, 3, 5]).await);
}

#[tokio::test]
async fn test_unicast_crosses_nodes() {
    let cluster = start_cluster(&["n0:1", "n1:1", "n2:1"]).await;
    let (session, master) = start_master(&cluster).await;
    let sid = session.session_id;
    spawn_five(&cluster, &session).await;

    assert!(cluster.nodes[0].send(Message::new(sid, 0, 4, 7, json!("to four"))));
    assert!(cluster.nodes[2].send(Message::new(sid, 5, 0, 8, json!("to master"))));

    // Agent 4 runs inside the process launched for agent 1 on n1.
    let host_of_four = process(&cluster, 1, 1, sid);
    assert!(eventually(|| host_of_four.delivered_to(4).iter().any(|m| m.message_type == 7)).await);
    assert!(host_of_four.delivered_to(1).is_empty());
    assert!(eventually(|| has(&master, |m| m.from_id == 5 && m.message_type == 8)).await);
}

#[tokio::test]
async fn test_broadcast_reaches_every_other_agent_once() {
    let cluster = start_cluster(&["n0:1", "n1:1", "n2:1"]).await;
    let (session, master) = start_master(&cluster).await;
    let sid = session.session_id;
    spawn_five(&cluster, &session).await;

    // Sender 1 is on n1, which also hosts 4.
    assert!(cluster.nodes[1].broadcast(Message::new(sid, 1, 0, 9, json!("hello all"))));

    // Each process receives one copy per agent it hosts, the sender excluded.
    let n1_host = process(&cluster, 1, 1, sid);
    let n2_host = process(&cluster, 2, 2, sid);
    let counts = || (broadcasts(&master, 9), broadcasts(&n1_host, 9), broadcasts(&n2_host, 9));
    assert!(eventually(|| counts() == (2, 1, 2)).await, "got {:?}", counts());
    assert_eq!(master.delivered_to(3).len(), 1);
    assert_eq!(n1_host.delivered_to(4).len(), 1);
    assert!(n1_host.delivered_to(1).is_empty());
    // Nothing more arrives later: relayed copies are not re-broadcast.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counts(), (2, 1, 2));
}

#[tokio::test]
async fn test_unreachable_node_reflects_delivery_failure() {
    let cluster = start_cluster(&["n0:1", "n1:1", "n2:1"]).await;
    let (session, master) = start_master(&cluster).await;
    let sid = session.session_id;
    spawn_five(&cluster, &session).await;

    cluster.loopback.set_reachable(&addr("n2:1"), false);
    let original = Message::new(sid, 0, 2, 11, json!({"n": 1}));
    assert!(cluster.nodes[0].send(original.clone()));

    assert!(eventually(|| has(&master, |m| m.is_delivery_failure())).await);
    let failures: Vec<Message> = master.messages().into_iter().filter(|m| m.is_delivery_failure()).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].from_id, 2);
    assert_eq!(failures[0].to_id, 0);
    assert_eq!(serde_json::from_value::<Message>(failures[0].content.clone()).unwrap(), original);
}

#[tokio::test]
async fn test_kill_session_tears_down_every_node() {
    let cluster = start_cluster(&["n0:1", "n1:1", "n2:1"]).await;
    let (session, _master) = start_master(&cluster).await;
    let sid = session.session_id;
    spawn_five(&cluster, &session).await;

    cluster.nodes[0].kill_session(sid).await;

    assert!(eventually(|| cluster.nodes.iter().all(|n| n.portfolio_snapshot(sid).is_none())).await);
    // Worker processes were killed, taking their hosted agents with them.
    for id in [1, 2, 4, 5] {
        assert!(cluster.loopback.agent(&AgentName::new(id, sid)).is_none());
    }
    // A second kill is a no-op.
    cluster.nodes[0].kill_session(sid).await;
}

#[tokio::test]
async fn test_master_leaving_ends_session() {
    let cluster = start_cluster(&["n0:1", "n1:1"]).await;
    let (session, _master) = start_master(&cluster).await;
    let sid = session.session_id;
    assert!(cluster.nodes[0].spawn(session.clone(), 2, "worker".to_string(), None, vec![]));
    assert!(eventually(|| cluster.nodes[1].running_agents(sid) == vec![0, 1, 2]).await);

    cluster.nodes[0].unregister_local_agent(sid, 0).await;

    assert!(eventually(|| cluster.nodes.iter().all(|n| n.portfolio_snapshot(sid).is_none())).await);
}

#[tokio::test]
async fn test_worker_leaving_is_announced() {
    let cluster = start_cluster(&["n0:1", "n1:1"]).await;
    let (session, _master) = start_master(&cluster).await;
    let sid = session.session_id;
    assert!(cluster.nodes[0].spawn(session.clone(), 1, "worker".to_string(), None, vec![]));
    assert!(eventually(|| cluster.nodes[0].running_agents(sid) == vec![0, 1]).await);

    cluster.nodes[1].unregister_local_agent(sid, 1).await;

    assert!(eventually(|| cluster.nodes[0].running_agents(sid) == vec![0]).await);
}

#[tokio::test]
async fn test_one_agent_per_node_strategy() {
    let cluster = start_cluster(&["n0:1", "n1:1", "n2:1"]).await;
    let (session, _master) = start_master(&cluster).await;
    let sid = session.session_id;

    assert!(cluster.nodes[0].spawn_with_strategy(session.clone(), 1, "worker".to_string(), None, vec![], 1, 0.0));

    assert!(eventually(|| cluster.nodes.iter().all(|n| n.running_agents(sid) == vec![0, 1, 2, 3])).await);
    for (i, node) in cluster.nodes.iter().enumerate() {
        let local = node.portfolio_snapshot(sid).unwrap().local_ids;
        let workers: Vec<u16> = local.into_iter().filter(|id| *id != 0).collect();
        assert_eq!(workers.len(), 1, "node {} hosts {:?}", i, workers);
    }
}

#[tokio::test]
async fn test_package_is_deployed_on_target_node() {
    let cluster = start_cluster(&["n0:1", "n1:1"]).await;
    let (session, _master) = start_master(&cluster).await;
    let sid = session.session_id;
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("worker"), b"#!/bin/sh\n").unwrap();
    let package = pack_directory(source.path()).unwrap();

    assert!(cluster.nodes[0].spawn(session.clone(), 1, "worker".to_string(), Some(package), vec![]));
    assert!(eventually(|| cluster.nodes[0].running_agents(sid) == vec![0, 1]).await);

    let deployed = cluster.apps.path().join("n1-1").join(format!("app-{}", sid)).join("worker");
    assert!(deployed.is_file());
    let launched = cluster.launchers[1].launched();
    assert_eq!(launched[0].program(), deployed);

    // Session teardown removes the deployment.
    cluster.nodes[0].kill_session(sid).await;
    assert!(eventually(|| !deployed.exists()).await);
}

#[tokio::test]
async fn test_stopped_node_is_marked_inactive_on_peers() {
    let cluster = start_cluster(&["n0:1", "n1:1", "n2:1"]).await;

    cluster.nodes[2].stop().await;

    let view = cluster.nodes[0].list_nodes().await;
    assert_eq!(view.len(), 3);
    let n2 = view.iter().find(|n| n.address == addr("n2:1")).unwrap();
    assert!(!n2.is_active);
    assert!(!cluster.nodes[2].send(Message::new(SessionId::new(), 0, 1, 0, json!(null))));
}

#[tokio::test]
async fn test_rejoin_with_unreachable_seed_keeps_history_inactive() {
    let loopback = LoopbackCluster::new();
    let apps = tempfile::tempdir().unwrap();
    let history = vec![
        ClusterNode::new(addr("old-a:1"), 8, "old-a"),
        ClusterNode::new(addr("old-b:1"), 2, "old-b"),
    ];
    let node = Arc::new(NodeVisor::new(
        settings("solo:1", vec![addr("old-a:1")], &apps),
        NodeDependencies {
            registry_store: Arc::new(InMemoryClusterRegistryStore::with_nodes(history)),
            cluster: loopback.clone(),
            agents: loopback.clone(),
            launcher: Arc::new(LoopbackLauncher::new(loopback.clone())),
        },
    ));
    loopback.attach_node(&node);

    node.start().await;

    let view = node.list_nodes().await;
    assert_eq!(view.len(), 3);
    for n in &view {
        assert_eq!(n.is_active, n.address == addr("solo:1"), "unexpected state for {}", n.address);
    }
    let old_a = view.iter().find(|n| n.address == addr("old-a:1")).unwrap();
    assert_eq!(old_a.processor_count, 8);
}

fn has(endpoint: &InMemoryAgentEndpoint, predicate: impl Fn(&Message) -> bool) -> bool {
    endpoint.messages().iter().any(predicate)
}

fn broadcasts(endpoint: &InMemoryAgentEndpoint, message_type: i32) -> usize {
    endpoint
        .messages()
        .iter()
        .filter(|m| m.is_broadcast() && m.message_type == message_type)
        .count()
}
