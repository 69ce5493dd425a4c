//! End-to-end cluster scenarios: three real nodes on loopback with
//! shortened election timing.

use std::{
    collections::HashMap,
    thread,
    time::{Duration, Instant},
};

use serde_json::json;
use tempfile::TempDir;

use replikv::{
    ElectionConfig, Node, NodeClient, NodeConfig, NodeId, ReadPreference, SET_SUCCESS,
};

fn test_timing() -> ElectionConfig {
    ElectionConfig {
        election_timeout: Duration::from_millis(300),
        heartbeat_interval: Duration::from_millis(100),
    }
}

fn node_addr(base_port: u16, id: NodeId) -> String {
    format!("127.0.0.1:{}", base_port + id as u16)
}

fn start_cluster(dir: &TempDir, base_port: u16, ids: &[NodeId]) -> Vec<Node> {
    ids.iter()
        .map(|id| {
            let peers: HashMap<NodeId, String> = ids
                .iter()
                .filter(|peer| **peer != *id)
                .map(|peer| (*peer, node_addr(base_port, *peer)))
                .collect();
            Node::start(NodeConfig {
                id: *id,
                addr: node_addr(base_port, *id),
                peers,
                data_path: dir.path().join(format!("node-{}.db", id)),
                sync_interval_ms: 0,
                election: test_timing(),
            })
            .unwrap()
        })
        .collect()
}

fn wait_for_leader(nodes: &[&Node], expected: NodeId, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        let converged = nodes
            .iter()
            .all(|node| node.election().current_leader() == Some(expected));
        if converged {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn cluster_elects_highest_id_and_reelects_on_leader_loss() {
    let dir = TempDir::new().unwrap();
    let nodes = start_cluster(&dir, 4610, &[1, 2, 3]);

    let all: Vec<&Node> = nodes.iter().collect();
    assert!(
        wait_for_leader(&all, 3, Duration::from_secs(5)),
        "cluster did not converge on node 3"
    );
    assert!(nodes[2].election().is_leader());
    assert!(!nodes[0].election().is_leader());
    assert!(!nodes[1].election().is_leader());

    nodes[2].shutdown();

    let survivors = [&nodes[0], &nodes[1]];
    assert!(
        wait_for_leader(&survivors, 2, Duration::from_secs(10)),
        "survivors did not converge on node 2"
    );
    assert!(nodes[1].election().is_leader());

    nodes[0].shutdown();
    nodes[1].shutdown();
}

#[test]
fn writes_go_through_the_leader_and_reach_every_follower() {
    let dir = TempDir::new().unwrap();
    let nodes = start_cluster(&dir, 4710, &[1, 2, 3]);

    let all: Vec<&Node> = nodes.iter().collect();
    assert!(wait_for_leader(&all, 3, Duration::from_secs(5)));

    {
        let mut leader = NodeClient::connect(node_addr(4710, 3)).unwrap();
        assert_eq!(leader.set(1, json!("test value")).unwrap(), SET_SUCCESS);
    }

    // The leader applied locally and every follower applied the fan-out.
    let expected = serde_json::to_vec(&json!("test value")).unwrap();
    for node in &nodes {
        let result = node
            .coordinator()
            .get(1, ReadPreference::FromLocal)
            .unwrap();
        assert_eq!(result.value, expected);
        assert!(result.found);
    }

    // A follower-routed read is answered by the leader.
    let routed = nodes[0]
        .coordinator()
        .get(1, ReadPreference::FromLeader)
        .unwrap();
    assert_eq!(routed.source, "node-3");

    for node in &nodes {
        node.shutdown();
    }
}

#[test]
fn writes_on_a_follower_are_rejected_naming_the_leader() {
    let dir = TempDir::new().unwrap();
    let nodes = start_cluster(&dir, 4810, &[1, 2, 3]);

    let all: Vec<&Node> = nodes.iter().collect();
    assert!(wait_for_leader(&all, 3, Duration::from_secs(5)));

    {
        let mut follower = NodeClient::connect(node_addr(4810, 1)).unwrap();
        let err = follower.set(1, json!("test value")).unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("not the leader") && msg.contains("3"),
            "unexpected rejection: {}",
            msg
        );
    }

    for node in &nodes {
        node.shutdown();
    }
}
