//! Portway networking layer
//!
//! TCP plumbing shared by the relay, the resource reverse client, and the
//! user client: a resumable frame reader, a queued per-peer writer with
//! backpressure, an accept-loop socket server, and a retrying dialer.

mod dial;
mod error;
mod reader;
mod server;
mod writer;

pub use dial::{connect, connect_hard};
pub use error::{NetError, Result};
pub use reader::FrameReader;
pub use server::SocketServer;
pub use writer::{spawn_writer, PeerWriter};

/// Default depth of a per-peer write queue, in frames.
///
/// A slow peer backs up only its own queue; senders wait when it is full.
pub const DEFAULT_WRITE_QUEUE_DEPTH: usize = 64;
