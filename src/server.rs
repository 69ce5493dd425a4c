//! The RPC server of one cluster node.
//!
//! A single listener carries election traffic, replication traffic and
//! the external service surface; every connection is handed to the worker
//! pool and served until the peer hangs up.

use std::{
    io::{BufReader, BufWriter, Write},
    net::{TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error};
use serde_json::Deserializer;

use crate::election::BullyElection;
use crate::proto::{Request, Response};
use crate::replication::Coordinator;
use crate::service::KvService;
use crate::thread_pool::ThreadPool;
use crate::Result;

/// The RPC server of a node.
pub struct NodeServer<P: ThreadPool> {
    handlers: Arc<Handlers>,
    pool: P,
}

struct Handlers {
    election: Arc<BullyElection>,
    coordinator: Arc<Coordinator>,
    service: KvService,
}

impl<P: ThreadPool> NodeServer<P> {
    /// Create a server dispatching to this node's election, coordinator
    /// and service handlers.
    pub fn new(
        election: Arc<BullyElection>,
        coordinator: Arc<Coordinator>,
        service: KvService,
        pool: P,
    ) -> Self {
        NodeServer {
            handlers: Arc::new(Handlers {
                election,
                coordinator,
                service,
            }),
            pool,
        }
    }

    /// Serve connections from `listener` until `stop` is raised.
    ///
    /// The accept loop re-checks `stop` on every connection, so raising
    /// the flag plus one wake-up connect shuts the server down.
    pub fn run(&self, listener: TcpListener, stop: &AtomicBool) -> Result<()> {
        for stream in listener.incoming() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let handlers = Arc::clone(&self.handlers);
                    self.pool.spawn(move || {
                        if let Err(e) = serve_connection(&handlers, stream) {
                            error!("Error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}

fn serve_connection(handlers: &Handlers, stream: TcpStream) -> Result<()> {
    let peer_addr = stream.peer_addr()?;
    let reader = BufReader::new(&stream);
    let mut writer = BufWriter::new(&stream);
    let requests = Deserializer::from_reader(reader).into_iter::<Request>();

    for request in requests {
        let request = request?;
        debug!("Receive request from {}: {:?}", peer_addr, request);
        let response = dispatch(handlers, request);
        serde_json::to_writer(&mut writer, &response)?;
        writer.flush()?;
        debug!("Response sent to {}: {:?}", peer_addr, response);
    }
    Ok(())
}

fn dispatch(handlers: &Handlers, request: Request) -> Response {
    match request {
        Request::Election(msg) => Response::Election(handlers.election.handle_message(msg)),
        Request::Replicate(req) => Response::Replicate {
            success: handlers.coordinator.handle_replication(&req),
        },
        Request::LeaderGet { key } => Response::LeaderGet(
            handlers
                .coordinator
                .handle_get(key)
                .map_err(|e| e.to_string()),
        ),
        Request::Set { key, value } => Response::Set(
            handlers
                .service
                .set(key, &value)
                .map_err(|e| e.to_string()),
        ),
        Request::Get { key } => Response::Get(handlers.service.get(key).map_err(|e| e.to_string())),
    }
}
