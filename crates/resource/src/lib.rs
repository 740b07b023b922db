//! Portway resource reverse client
//!
//! Run by a resource process, usually behind NAT: dials out to the relay's
//! resource port, proves its identity (and checks the relay's), then serves
//! forwarded commands by handing them to a [`CommandHandler`].

mod client;
mod handler;

use thiserror::Error;

pub use client::{ResourceClient, ResourceConfig};
pub use handler::{CommandHandler, HandlerError};

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Network error: {0}")]
    Net(#[from] portway_net::NetError),

    #[error("Protocol violation: {0}")]
    Wire(#[from] portway_core::WireError),

    #[error("Handshake failed: {0}")]
    Handshake(&'static str),

    #[error("Relay signature did not verify; refusing to serve")]
    RelayNotTrusted,
}

pub type Result<T> = std::result::Result<T, ResourceError>;
