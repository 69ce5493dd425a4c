use std::{collections::HashMap, fs, path::PathBuf, process::exit};

use clap::Parser;
use log::{error, info, LevelFilter};

use replikv::{ElectionConfig, KvError, Node, NodeConfig, NodeId, Result};

/// Args for replikv-node
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct NodeArgs {
    /// This node's ID; must appear in the cluster map
    node_id: NodeId,
    /// Port the RPC listener binds to on 127.0.0.1
    port: u16,
}

/// The deployment's fixed cluster map; each node gets this list minus
/// itself as its peer table.
const CLUSTER: &[(NodeId, &str)] = &[
    (1, "127.0.0.1:4001"),
    (2, "127.0.0.1:4002"),
    (3, "127.0.0.1:4003"),
];

const SYNC_INTERVAL_MS: u64 = 1000;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let args = NodeArgs::parse();
    if let Err(e) = run(args) {
        error!("{}", e);
        exit(1);
    }
}

fn run(args: NodeArgs) -> Result<()> {
    if !CLUSTER.iter().any(|(id, _)| *id == args.node_id) {
        return Err(KvError::InvalidArgument(format!(
            "node id {} is not in the cluster map",
            args.node_id
        )));
    }

    let peers: HashMap<NodeId, String> = CLUSTER
        .iter()
        .filter(|(id, _)| *id != args.node_id)
        .map(|(id, addr)| (*id, addr.to_string()))
        .collect();

    // The engine refuses to create parent directories itself.
    fs::create_dir_all("data")?;
    let data_path = PathBuf::from(format!("data/replikv-node-{}.db", args.node_id));

    info!("replikv-node {}", env!("CARGO_PKG_VERSION"));

    let node = Node::start(NodeConfig {
        id: args.node_id,
        addr: format!("127.0.0.1:{}", args.port),
        peers,
        data_path,
        sync_interval_ms: SYNC_INTERVAL_MS,
        election: ElectionConfig::default(),
    })?;

    node.wait();
    node.shutdown();
    Ok(())
}
