use thiserror::Error;

/// Error type for replikv.
#[derive(Error, Debug)]
pub enum KvError {
    /// IO error
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization error.
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// Log path contains redundant or escaping components.
    #[error("invalid database path: {0}")]
    InvalidPath(String),
    /// Malformed record found while replaying the log.
    /// It indicates a corrupted log file; the store is not built.
    #[error("corrupt log record: {0}")]
    Corrupt(String),
    /// The log engine has already been closed.
    #[error("log engine is closed")]
    Closed,
    /// Reading or removing a non-existent key.
    #[error("Key not found")]
    KeyNotFound,
    /// Request payload failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Write arrived on a node that is not the leader.
    #[error("not the leader, current leader is node {0}")]
    NotLeader(u64),
    /// No leader is known to this node.
    #[error("no leader available")]
    NoLeader,
    /// One or more peers failed to acknowledge a replicated write.
    #[error("replication errors: {0}")]
    Replication(String),
    /// Error with a string message
    #[error("{0}")]
    StringError(String),
}

/// Custom result type for KvError
pub type Result<T> = std::result::Result<T, KvError>;
