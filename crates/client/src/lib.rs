//! Portway user client
//!
//! The forward-connecting side: dial the relay's user port, resolve a
//! resource, send it payloads, read the replies. Indices correlate requests
//! with responses, so calls may be issued concurrently from many tasks.

mod client;

use thiserror::Error;

pub use client::{SendReply, UserClient};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Net(#[from] portway_net::NetError),

    #[error("Protocol violation: {0}")]
    Wire(#[from] portway_core::WireError),

    #[error("Relay answered {command:#010x} with status {status:#010x}")]
    Status { command: u32, status: u32 },

    #[error("Connection to relay lost")]
    ConnectionLost,
}

impl ClientError {
    /// The error status the relay answered with, if that is what this is.
    pub fn status(&self) -> Option<u32> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
