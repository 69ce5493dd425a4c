//! Assembly of one cluster node: log engine, store, election,
//! coordinator, service and RPC server, wired together and torn down as a
//! unit.

use std::{
    collections::HashMap,
    net::{TcpListener, TcpStream},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use log::{error, info};

use crate::election::{BullyElection, ElectionConfig};
use crate::proto::NodeId;
use crate::replication::Coordinator;
use crate::server::NodeServer;
use crate::service::KvService;
use crate::store::Store;
use crate::thread_pool::{RayonThreadPool, ThreadPool};
use crate::Result;

/// Everything needed to bring one node up.
pub struct NodeConfig {
    /// This node's ID; must be unique across the cluster.
    pub id: NodeId,
    /// Address the RPC listener binds to.
    pub addr: String,
    /// Every other node's ID and address.
    pub peers: HashMap<NodeId, String>,
    /// Path of the append-only log file; its parent must exist.
    pub data_path: PathBuf,
    /// Log flush interval in milliseconds; zero syncs every write.
    pub sync_interval_ms: u64,
    /// Election and heartbeat timing.
    pub election: ElectionConfig,
}

/// A running node. Dropping the handle does not stop it; call
/// [Node::shutdown].
pub struct Node {
    addr: String,
    election: Arc<BullyElection>,
    coordinator: Arc<Coordinator>,
    stop: Arc<AtomicBool>,
    server_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Node {
    /// Open the store, start election and serve RPC.
    ///
    /// The listener is bound before this returns, so peers can connect
    /// immediately.
    pub fn start(config: NodeConfig) -> Result<Node> {
        let store = Store::open(&config.data_path, config.sync_interval_ms)?;
        let listener = TcpListener::bind(&config.addr)?;

        let election = BullyElection::start(config.id, config.peers, config.election);
        let coordinator = Arc::new(Coordinator::new(config.id, store, Arc::clone(&election)));
        let service = KvService::new(Arc::clone(&coordinator));

        let pool = RayonThreadPool::new(num_cpus::get())?;
        let server = NodeServer::new(
            Arc::clone(&election),
            Arc::clone(&coordinator),
            service,
            pool,
        );

        let stop = Arc::new(AtomicBool::new(false));
        let server_stop = Arc::clone(&stop);
        let server_thread = thread::spawn(move || {
            if let Err(e) = server.run(listener, &server_stop) {
                error!("server exited with error: {}", e);
            }
        });

        info!("node {} listening on {}", config.id, config.addr);
        Ok(Node {
            addr: config.addr,
            election,
            coordinator,
            stop,
            server_thread: Mutex::new(Some(server_thread)),
        })
    }

    /// This node's election state.
    pub fn election(&self) -> &Arc<BullyElection> {
        &self.election
    }

    /// This node's replication coordinator.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Block until the server thread exits.
    pub fn wait(&self) {
        if let Some(handle) = self.server_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Stop serving, stop the election tasks and close the log.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.election.shutdown();

        // The accept loop only re-checks the flag on a connection. The
        // server thread is detached rather than joined: its pool may
        // still be draining a long-lived client connection.
        let _ = TcpStream::connect(&self.addr);
        drop(self.server_thread.lock().unwrap().take());

        if let Err(e) = self.coordinator.store().close() {
            error!("closing store failed: {}", e);
        }
        info!("node {} stopped", self.election.id());
    }
}
