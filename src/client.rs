//! RPC client for talking to a node, used both by the CLI binary and for
//! internode calls.

use std::{
    io::{BufReader, BufWriter, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use serde::Deserialize;
use serde_json::de::{Deserializer, IoRead};

use crate::proto::{ElectionReply, GetResult, Message, ReplicateRequest, Request, Response};
use crate::{KvError, Result};

/// A connection to one node's RPC listener.
///
/// Frames are JSON values streamed over the socket, one request and one
/// response per call, in the order issued.
pub struct NodeClient {
    reader: Deserializer<IoRead<BufReader<TcpStream>>>,
    writer: BufWriter<TcpStream>,
}

impl NodeClient {
    /// Connect to `addr` with no deadline. Used by the CLI.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<NodeClient> {
        Self::from_stream(TcpStream::connect(addr)?)
    }

    /// Connect to `addr` and bound every dial, read and write by
    /// `timeout`. Internode calls use this so a dead peer costs at most
    /// one deadline.
    pub fn connect_timeout(addr: &str, timeout: Duration) -> Result<NodeClient> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| KvError::StringError(format!("cannot resolve address {}", addr)))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Self::from_stream(stream)
    }

    fn from_stream(stream: TcpStream) -> Result<NodeClient> {
        let reader = Deserializer::from_reader(BufReader::new(stream.try_clone()?));
        let writer = BufWriter::new(stream);
        Ok(NodeClient { reader, writer })
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        serde_json::to_writer(&mut self.writer, request)?;
        self.writer.flush()?;
        Ok(Response::deserialize(&mut self.reader)?)
    }

    /// Send one election message and return the peer's reply.
    pub fn election(&mut self, msg: Message) -> Result<ElectionReply> {
        match self.call(&Request::Election(msg))? {
            Response::Election(reply) => Ok(reply),
            other => Err(unexpected(&other)),
        }
    }

    /// Forward one replicated write; returns whether the peer applied it.
    pub fn replicate(&mut self, request: ReplicateRequest) -> Result<bool> {
        match self.call(&Request::Replicate(request))? {
            Response::Replicate { success } => Ok(success),
            other => Err(unexpected(&other)),
        }
    }

    /// Read `key` from the leader on behalf of a follower.
    pub fn leader_get(&mut self, key: u64) -> Result<GetResult> {
        match self.call(&Request::LeaderGet { key })? {
            Response::LeaderGet(reply) => reply.map_err(KvError::StringError),
            other => Err(unexpected(&other)),
        }
    }

    /// External write; returns the service's status string.
    pub fn set(&mut self, key: i64, value: serde_json::Value) -> Result<String> {
        match self.call(&Request::Set { key, value })? {
            Response::Set(reply) => reply.map_err(KvError::StringError),
            other => Err(unexpected(&other)),
        }
    }

    /// External read.
    pub fn get(&mut self, key: i64) -> Result<GetResult> {
        match self.call(&Request::Get { key })? {
            Response::Get(reply) => reply.map_err(KvError::StringError),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> KvError {
    KvError::StringError(format!("mismatched response frame: {:?}", response))
}
