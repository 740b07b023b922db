//! Portway core types
//!
//! The wire codec for the command/response envelope, the command and status
//! code spaces, and the payload structures shared between the relay, the
//! resource reverse client, and the user client.

pub mod codes;
pub mod error;
pub mod protocol;
pub mod wire;

pub use codes::*;
pub use error::WireError;
pub use protocol::{ForwardEnvelope, ResourceRecord, MAX_DESCRIPTION_LEN, MAX_NAME_LEN};
pub use wire::{
    command_code, response_code, Command, Response, COMMAND_HEADER_LEN, RESPONSE_CODE_OFFSET,
    RESPONSE_HEADER_LEN,
};

/// A resource identity: the Ed25519 public key it proved during the handshake.
pub type Identity = [u8; 32];

/// Render an identity for log output (first 8 bytes, hex).
pub fn short_identity(identity: &Identity) -> String {
    hex::encode(&identity[..8])
}
