//! Bully leader election over point-to-point RPC.
//!
//! Every node runs a monitor task that starts an election whenever no
//! leader is known, and pings the leader otherwise. An election notifies
//! all higher-ID peers; if any of them answers "I'm alive and I outrank
//! you" the candidate stands down, otherwise it declares victory,
//! broadcasts `ElectionCompleted` and starts heartbeating. The live node
//! with the highest ID therefore always ends up leading.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, RwLock,
    },
    thread,
    time::{Duration, Instant, SystemTime},
};

use dashmap::DashMap;
use log::{debug, info, warn};

use crate::client::NodeClient;
use crate::proto::{ElectionReply, Message, MessageType, NodeId};
use crate::Result;

/// Timing knobs for election and failure detection.
#[derive(Debug, Clone, Copy)]
pub struct ElectionConfig {
    /// Monitor tick period, candidate wait window and per-call RPC
    /// deadline.
    pub election_timeout: Duration,
    /// Leader heartbeat period.
    pub heartbeat_interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        ElectionConfig {
            election_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

/// Election role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Accepts replicated writes from the leader.
    Follower,
    /// Holding an election.
    Candidate,
    /// Accepts external writes and drives replication.
    Leader,
}

/// A peer as seen from this node. The table is fixed at construction;
/// only the `alive` flag changes afterwards.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer's node ID.
    pub id: NodeId,
    /// Peer's RPC address.
    pub addr: String,
    /// Whether the last contact with this peer succeeded.
    pub alive: bool,
}

struct ElectionState {
    state: NodeState,
    leader: Option<NodeId>,
    /// An election round is in flight on this node.
    electing: bool,
}

/// Bully election state machine for one node.
pub struct BullyElection {
    id: NodeId,
    config: ElectionConfig,
    peers: DashMap<NodeId, Peer>,
    state: RwLock<ElectionState>,
    /// A heartbeat task is currently running.
    heartbeating: AtomicBool,
    shutdown: ShutdownSignal,
}

impl BullyElection {
    /// Build the election state for node `id` and start its monitor task.
    ///
    /// `peer_list` maps every other node's ID to its RPC address.
    pub fn start(
        id: NodeId,
        peer_list: HashMap<NodeId, String>,
        config: ElectionConfig,
    ) -> Arc<BullyElection> {
        let peers = DashMap::new();
        for (peer_id, addr) in peer_list {
            peers.insert(
                peer_id,
                Peer {
                    id: peer_id,
                    addr,
                    alive: true,
                },
            );
        }

        let election = Arc::new(BullyElection {
            id,
            config,
            peers,
            state: RwLock::new(ElectionState {
                state: NodeState::Follower,
                leader: None,
                electing: false,
            }),
            heartbeating: AtomicBool::new(false),
            shutdown: ShutdownSignal::new(),
        });

        let this = Arc::clone(&election);
        let stop = election.shutdown.subscribe();
        thread::spawn(move || this.monitor(stop));

        election
    }

    /// This node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The leader this node currently believes in, if any.
    pub fn current_leader(&self) -> Option<NodeId> {
        self.state.read().unwrap().leader
    }

    /// Whether this node is the leader.
    pub fn is_leader(&self) -> bool {
        self.state.read().unwrap().state == NodeState::Leader
    }

    /// This node's election role.
    pub fn state(&self) -> NodeState {
        self.state.read().unwrap().state
    }

    /// Snapshot of the peer table.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// RPC address of `id`, if it is a known peer.
    pub fn peer_addr(&self, id: NodeId) -> Option<String> {
        self.peers.get(&id).map(|peer| peer.addr.clone())
    }

    /// Per-call deadline for internode RPC.
    pub fn rpc_timeout(&self) -> Duration {
        self.config.election_timeout
    }

    /// Stop the monitor and heartbeat tasks.
    pub fn shutdown(&self) {
        self.shutdown.signal();
    }

    /// RPC handler for all election traffic.
    pub fn handle_message(self: &Arc<Self>, msg: Message) -> ElectionReply {
        match msg.kind {
            MessageType::Ping => {
                debug!("node {}: ping from node {}", self.id, msg.sender_id);
                self.reply(true)
            }
            MessageType::ElectionInProgress => {
                if msg.sender_id < self.id {
                    // We outrank the sender: acknowledge that we are alive
                    // and will take over, then hold our own election.
                    info!(
                        "node {}: election from lower node {}, contesting",
                        self.id, msg.sender_id
                    );
                    let this = Arc::clone(self);
                    thread::spawn(move || this.start_election());
                    self.reply(true)
                } else {
                    self.reply(false)
                }
            }
            MessageType::ElectionCompleted => {
                info!("node {}: node {} is the new leader", self.id, msg.sender_id);
                self.set_leader(msg.sender_id);
                self.reply(true)
            }
        }
    }

    fn reply(&self, success: bool) -> ElectionReply {
        ElectionReply {
            success,
            node_id: self.id,
        }
    }

    /// Periodic tick: elect when leaderless, otherwise check on the
    /// leader.
    fn monitor(self: Arc<Self>, stop: mpsc::Receiver<()>) {
        loop {
            match stop.recv_timeout(self.config.election_timeout) {
                Err(mpsc::RecvTimeoutError::Timeout) => match self.current_leader() {
                    None => self.start_election(),
                    Some(id) if id == self.id => {}
                    Some(id) => {
                        if !self.ping_leader(id) {
                            warn!("node {}: lost contact with leader {}", self.id, id);
                            self.state.write().unwrap().leader = None;
                            self.start_election();
                        }
                    }
                },
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn ping_leader(&self, leader_id: NodeId) -> bool {
        let addr = match self.peer_addr(leader_id) {
            Some(addr) => addr,
            None => return false,
        };
        let reply = send_message(
            &addr,
            self.message(MessageType::Ping),
            self.config.election_timeout,
        );
        let ok = matches!(reply, Ok(reply) if reply.success);
        self.mark_alive(leader_id, ok);
        ok
    }

    /// Hold one election round.
    ///
    /// At most one round runs per node at a time; re-entrant triggers
    /// (monitor tick plus a contested election message) collapse into the
    /// round already in flight.
    pub fn start_election(self: &Arc<Self>) {
        {
            let mut state = self.state.write().unwrap();
            if state.electing {
                return;
            }
            state.electing = true;
            state.state = NodeState::Candidate;
        }
        info!("node {}: starting election", self.id);

        let higher: Vec<Peer> = self
            .peers()
            .into_iter()
            .filter(|peer| peer.id > self.id)
            .collect();

        if higher.is_empty() || !self.await_higher_peers(&higher) {
            self.become_leader();
        } else {
            // A higher node is alive and will take over; stay candidate
            // until its ElectionCompleted arrives.
            info!("node {}: standing down, a higher node is alive", self.id);
            self.state.write().unwrap().electing = false;
        }
    }

    /// Notify every higher peer and wait up to the election window for
    /// one of them to claim the election. Returns true when outranked.
    fn await_higher_peers(self: &Arc<Self>, higher: &[Peer]) -> bool {
        let (tx, rx) = mpsc::sync_channel(higher.len());
        for peer in higher {
            let tx = tx.clone();
            let addr = peer.addr.clone();
            let peer_id = peer.id;
            let msg = self.message(MessageType::ElectionInProgress);
            let timeout = self.config.election_timeout;
            thread::spawn(move || {
                let outcome = match send_message(&addr, msg, timeout) {
                    Ok(reply) => Some(reply.success),
                    Err(e) => {
                        debug!("election notice to node {} failed: {}", peer_id, e);
                        None
                    }
                };
                let _ = tx.send((peer_id, outcome));
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.config.election_timeout;
        let mut pending = higher.len();
        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((peer_id, outcome)) => {
                    self.mark_alive(peer_id, outcome.is_some());
                    if outcome == Some(true) {
                        return true;
                    }
                    pending -= 1;
                }
                Err(_) => return false,
            }
        }
        false
    }

    fn become_leader(self: &Arc<Self>) {
        {
            let mut state = self.state.write().unwrap();
            state.state = NodeState::Leader;
            state.leader = Some(self.id);
            state.electing = false;
        }
        info!("node {}: became leader", self.id);

        self.broadcast(MessageType::ElectionCompleted);

        // Re-winning an election while already leading must not stack a
        // second heartbeat task.
        if !self.heartbeating.swap(true, Ordering::SeqCst) {
            let this = Arc::clone(self);
            let stop = self.shutdown.subscribe();
            thread::spawn(move || this.heartbeat(stop));
        }
    }

    fn heartbeat(self: Arc<Self>, stop: mpsc::Receiver<()>) {
        loop {
            match stop.recv_timeout(self.config.heartbeat_interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if !self.is_leader() {
                        break;
                    }
                    self.broadcast(MessageType::Ping);
                }
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        self.heartbeating.store(false, Ordering::SeqCst);
    }

    /// Fire-and-forget a message to every peer.
    fn broadcast(&self, kind: MessageType) {
        for peer in self.peers() {
            let msg = self.message(kind);
            let timeout = self.config.election_timeout;
            thread::spawn(move || {
                if let Err(e) = send_message(&peer.addr, msg, timeout) {
                    debug!("broadcast to node {} failed: {}", peer.id, e);
                }
            });
        }
    }

    fn set_leader(&self, leader_id: NodeId) {
        let mut state = self.state.write().unwrap();
        state.leader = Some(leader_id);
        state.state = if leader_id == self.id {
            NodeState::Leader
        } else {
            NodeState::Follower
        };
    }

    fn mark_alive(&self, peer_id: NodeId, alive: bool) {
        if let Some(mut peer) = self.peers.get_mut(&peer_id) {
            peer.alive = alive;
        }
    }

    fn message(&self, kind: MessageType) -> Message {
        Message {
            sender_id: self.id,
            kind,
            occur_at: SystemTime::now(),
        }
    }
}

fn send_message(addr: &str, msg: Message, timeout: Duration) -> Result<ElectionReply> {
    let mut client = NodeClient::connect_timeout(addr, timeout)?;
    client.election(msg)
}

/// One-shot broadcast signal with per-task subscriptions, so every
/// long-lived task can block on its own receiver and still tick.
struct ShutdownSignal {
    flag: AtomicBool,
    senders: Mutex<Vec<mpsc::Sender<()>>>,
}

impl ShutdownSignal {
    fn new() -> ShutdownSignal {
        ShutdownSignal {
            flag: AtomicBool::new(false),
            senders: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel();
        if self.flag.load(Ordering::SeqCst) {
            let _ = tx.send(());
        }
        self.senders.lock().unwrap().push(tx);
        rx
    }

    fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
        for tx in self.senders.lock().unwrap().drain(..) {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lone_node(id: NodeId) -> Arc<BullyElection> {
        // A long tick keeps the monitor quiet for the duration of a test.
        BullyElection::start(
            id,
            HashMap::new(),
            ElectionConfig {
                election_timeout: Duration::from_secs(300),
                heartbeat_interval: Duration::from_secs(300),
            },
        )
    }

    #[test]
    fn ping_is_acknowledged() {
        let election = lone_node(2);
        let reply = election.handle_message(Message {
            sender_id: 1,
            kind: MessageType::Ping,
            occur_at: SystemTime::now(),
        });
        assert!(reply.success);
        assert_eq!(reply.node_id, 2);
        election.shutdown();
    }

    #[test]
    fn completed_from_peer_demotes_to_follower() {
        let election = lone_node(2);
        let reply = election.handle_message(Message {
            sender_id: 3,
            kind: MessageType::ElectionCompleted,
            occur_at: SystemTime::now(),
        });
        assert!(reply.success);
        assert_eq!(election.current_leader(), Some(3));
        assert_eq!(election.state(), NodeState::Follower);

        // Duplicate completions are idempotent.
        election.handle_message(Message {
            sender_id: 3,
            kind: MessageType::ElectionCompleted,
            occur_at: SystemTime::now(),
        });
        assert_eq!(election.current_leader(), Some(3));
        election.shutdown();
    }

    #[test]
    fn election_notice_from_higher_node_is_not_contested() {
        let election = lone_node(2);
        let reply = election.handle_message(Message {
            sender_id: 5,
            kind: MessageType::ElectionInProgress,
            occur_at: SystemTime::now(),
        });
        assert!(!reply.success);
        assert_eq!(election.state(), NodeState::Follower);
        election.shutdown();
    }

    #[test]
    fn election_notice_from_lower_node_triggers_takeover() {
        let election = lone_node(2);
        let reply = election.handle_message(Message {
            sender_id: 1,
            kind: MessageType::ElectionInProgress,
            occur_at: SystemTime::now(),
        });
        assert!(reply.success);

        // With no higher peers the contested election wins immediately.
        for _ in 0..50 {
            if election.is_leader() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(election.is_leader());
        assert_eq!(election.current_leader(), Some(2));
        election.shutdown();
    }

    #[test]
    fn leadership_implies_own_leader_id() {
        let election = lone_node(7);
        election.start_election();
        assert!(election.is_leader());
        assert_eq!(election.current_leader(), Some(7));
        election.shutdown();
    }
}
