use thiserror::Error;

use portway_core::WireError;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol violation: {0}")]
    Wire(#[from] WireError),

    #[error("Connection closed mid-frame")]
    UnexpectedEof,

    #[error("Peer is gone")]
    PeerGone,

    #[error("Peer write queue is full")]
    QueueFull,

    #[error("Connect to {addr} timed out after {millis}ms")]
    ConnectTimeout { addr: String, millis: u64 },

    #[error("Could not reach {addr} within {millis}ms: {last}")]
    RetriesExhausted {
        addr: String,
        millis: u64,
        last: String,
    },
}

pub type Result<T> = std::result::Result<T, NetError>;
