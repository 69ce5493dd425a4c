//! Write-through-leader replication.
//!
//! All external writes funnel through the elected leader, which fans each
//! accepted write out to every peer before applying it locally. Reads are
//! served from the local store or routed to the leader, depending on the
//! caller's preference.

use std::{
    sync::{mpsc, Arc},
    thread,
    time::{Duration, SystemTime},
};

use log::{error, warn};

use crate::client::NodeClient;
use crate::election::BullyElection;
use crate::proto::{GetResult, NodeId, ReplicateRequest};
use crate::store::Store;
use crate::{KvError, Result};

/// All replicated writes land in this bucket.
const KEY_BUCKET: &str = "kvstore";

/// Where a read is allowed to be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreference {
    /// Route to the leader unless this node leads.
    FromLeader,
    /// Always answer from the local store.
    FromLocal,
}

/// Routes writes through the leader and fans them out to followers.
pub struct Coordinator {
    node_id: NodeId,
    bucket: String,
    store: Store,
    election: Arc<BullyElection>,
}

impl Coordinator {
    /// Wire a coordinator over this node's store and election state.
    pub fn new(node_id: NodeId, store: Store, election: Arc<BullyElection>) -> Coordinator {
        Coordinator {
            node_id,
            bucket: KEY_BUCKET.to_string(),
            store,
            election,
        }
    }

    /// The store this coordinator writes through.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Accept a write on the leader and replicate it everywhere.
    ///
    /// Fails on a non-leader, naming the current leader when known. The
    /// fan-out runs first; the local apply only happens once every peer
    /// has accepted, and peers that did accept are never rolled back.
    pub fn set(&self, key: u64, value: &[u8]) -> Result<()> {
        if !self.election.is_leader() {
            return Err(match self.election.current_leader() {
                Some(leader) => KvError::NotLeader(leader),
                None => KvError::NoLeader,
            });
        }

        self.replicate_to_peers(key, value)?;
        self.store.set(&self.bucket, key, value)
    }

    /// Send the write to every peer concurrently and join all responses.
    fn replicate_to_peers(&self, key: u64, value: &[u8]) -> Result<()> {
        let peers = self.election.peers();
        if peers.is_empty() {
            return Ok(());
        }

        let timeout = self.election.rpc_timeout();
        let (tx, rx) = mpsc::sync_channel(peers.len());
        for peer in peers {
            let tx = tx.clone();
            let request = ReplicateRequest {
                key,
                value: value.to_vec(),
                occur_at: SystemTime::now(),
                leader_id: self.node_id,
            };
            thread::spawn(move || {
                let result = send_replication(&peer.addr, request, timeout);
                let _ = tx.send((peer.id, result));
            });
        }
        drop(tx);

        let mut failures = Vec::new();
        for (peer_id, result) in rx {
            if let Err(e) = result {
                failures.push(format!("node {}: {}", peer_id, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(KvError::Replication(failures.join("; ")))
        }
    }

    /// Follower-side handler for a fanned-out write.
    ///
    /// The write is applied only when the sender matches this node's idea
    /// of the current leader.
    pub fn handle_replication(&self, request: &ReplicateRequest) -> bool {
        if Some(request.leader_id) != self.election.current_leader() {
            warn!(
                "node {}: rejecting replication from node {}, current leader is {:?}",
                self.node_id,
                request.leader_id,
                self.election.current_leader()
            );
            return false;
        }

        match self.store.set(&self.bucket, request.key, &request.value) {
            Ok(()) => true,
            Err(e) => {
                error!("node {}: replicated write failed: {}", self.node_id, e);
                false
            }
        }
    }

    /// Read `key` honoring the caller's placement preference.
    pub fn get(&self, key: u64, preference: ReadPreference) -> Result<GetResult> {
        match preference {
            ReadPreference::FromLocal => self.get_local(key),
            ReadPreference::FromLeader => {
                if self.election.is_leader() {
                    self.get_local(key)
                } else {
                    self.get_from_leader(key)
                }
            }
        }
    }

    /// Leader-side handler for a read routed from a follower.
    pub fn handle_get(&self, key: u64) -> Result<GetResult> {
        if !self.election.is_leader() {
            return Err(match self.election.current_leader() {
                Some(leader) => KvError::NotLeader(leader),
                None => KvError::NoLeader,
            });
        }
        self.get_local(key)
    }

    fn get_local(&self, key: u64) -> Result<GetResult> {
        let value = self.store.get(&self.bucket, key).ok_or(KvError::KeyNotFound)?;
        Ok(GetResult {
            value,
            found: true,
            timestamp: SystemTime::now(),
            source: format!("node-{}", self.node_id),
        })
    }

    fn get_from_leader(&self, key: u64) -> Result<GetResult> {
        let leader = self.election.current_leader().ok_or(KvError::NoLeader)?;
        let addr = self.election.peer_addr(leader).ok_or_else(|| {
            KvError::StringError(format!("leader node {} not in peer table", leader))
        })?;

        let mut client = NodeClient::connect_timeout(&addr, self.election.rpc_timeout())?;
        client.leader_get(key)
    }
}

fn send_replication(addr: &str, request: ReplicateRequest, timeout: Duration) -> Result<()> {
    let mut client = NodeClient::connect_timeout(addr, timeout)?;
    if !client.replicate(request)? {
        return Err(KvError::StringError(format!(
            "replication rejected by peer {}",
            addr
        )));
    }
    Ok(())
}
