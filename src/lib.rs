#![deny(missing_docs)]
//! A small replicated key/value store.
//!
//! Each node keeps an in-memory index of integer keys grouped into named
//! buckets, persists every mutation to an append-only log, and takes part
//! in a Bully leader election so that writes are serialized through one
//! coordinator and fanned out to the rest of the cluster.

mod client;
mod election;
mod error;
mod node;
mod persist;
mod proto;
mod replication;
mod server;
mod service;
mod store;
pub mod thread_pool;

pub use client::NodeClient;
pub use election::{BullyElection, ElectionConfig, NodeState, Peer};
pub use error::{KvError, Result};
pub use node::{Node, NodeConfig};
pub use persist::{Aof, Keys};
pub use proto::{
    ElectionReply, GetResult, Message, MessageType, NodeId, ReplicateRequest, Request, Response,
};
pub use replication::{Coordinator, ReadPreference};
pub use server::NodeServer;
pub use service::{KvService, SET_SUCCESS};
pub use store::Store;
