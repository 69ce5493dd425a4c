//! Wire types for the point-to-point RPC protocol.
//!
//! Every node runs one TCP listener carrying all methods; requests and
//! responses are tagged enums streamed as JSON. Election traffic,
//! replication traffic and the external service surface all share the
//! same frame types.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Node identifier. IDs are globally unique; the highest live ID wins
/// elections.
pub type NodeId = u64;

/// Kinds of election messages exchanged between nodes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Leader liveness probe.
    Ping,
    /// A lower node is holding an election.
    ElectionInProgress,
    /// The sender has won an election.
    ElectionCompleted,
}

/// An election message.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Message {
    /// ID of the sending node.
    pub sender_id: NodeId,
    /// What the sender is telling us.
    pub kind: MessageType,
    /// When the sender produced the message.
    pub occur_at: SystemTime,
}

/// Reply to an election message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ElectionReply {
    /// For [MessageType::ElectionInProgress]: the responder is alive and
    /// outranks the sender. For the other kinds: acknowledgement.
    pub success: bool,
    /// ID of the responding node.
    pub node_id: NodeId,
}

/// A write fanned out from the leader to a follower.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicateRequest {
    /// Key within the replication bucket.
    pub key: u64,
    /// Marshaled value bytes.
    pub value: Vec<u8>,
    /// When the leader accepted the write.
    pub occur_at: SystemTime,
    /// The sender's idea of who leads; followers reject mismatches.
    pub leader_id: NodeId,
}

/// Result of a read, local or via the leader.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetResult {
    /// Marshaled value bytes.
    pub value: Vec<u8>,
    /// Whether the key existed.
    pub found: bool,
    /// When the serving node answered.
    pub timestamp: SystemTime,
    /// `node-<id>` of the serving node.
    pub source: String,
}

/// One request frame.
#[derive(Serialize, Deserialize, Debug)]
pub enum Request {
    /// `Election.HandleMessage`
    Election(Message),
    /// `Coordinator.HandleReplication`
    Replicate(ReplicateRequest),
    /// `Coordinator.HandleGet` — leader-side read on behalf of a follower.
    LeaderGet {
        /// Key within the replication bucket.
        key: u64,
    },
    /// `Service.Set` — external write.
    Set {
        /// External key; validated non-negative by the service.
        key: i64,
        /// Arbitrary JSON value, marshaled by the service.
        value: serde_json::Value,
    },
    /// `Service.Get` — external read.
    Get {
        /// External key; validated non-negative by the service.
        key: i64,
    },
}

/// One response frame; the variant always matches the request's.
#[derive(Serialize, Deserialize, Debug)]
pub enum Response {
    /// Reply to [Request::Election].
    Election(ElectionReply),
    /// Reply to [Request::Replicate].
    Replicate {
        /// Whether the follower applied the write.
        success: bool,
    },
    /// Reply to [Request::LeaderGet].
    LeaderGet(core::result::Result<GetResult, String>),
    /// Reply to [Request::Set]; `Ok` carries a status string.
    Set(core::result::Result<String, String>),
    /// Reply to [Request::Get].
    Get(core::result::Result<GetResult, String>),
}
