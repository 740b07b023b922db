//! Portway relay
//!
//! The relay process: accepts resources on one port and users on another,
//! runs the admission handshake, and forwards opaque payloads between the
//! two populations. Sessions are isolated — a protocol violation or transport
//! error on one connection never affects another.

mod dispatch;
mod handlers;
mod registry;
mod server;
mod session;
mod token;

use thiserror::Error;

pub use dispatch::{Dispatcher, Outcome};
pub use registry::Registry;
pub use server::{Relay, RelayConfig};
pub use session::{allocate_handle, ResourceSession, UserSession};
pub use token::{ShutdownToken, TOKEN_LEN};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Failed to create shutdown token at {path}: {source}")]
    Token {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Network error: {0}")]
    Net(#[from] portway_net::NetError),

    #[error("Protocol violation: {0}")]
    Wire(#[from] portway_core::WireError),

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(&'static str),

    #[error("Handshake timed out")]
    HandshakeTimeout,
}

pub type Result<T> = std::result::Result<T, RelayError>;
