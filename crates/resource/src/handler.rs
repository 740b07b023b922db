//! Application-side command handling
//!
//! The relay hands a resource opaque `(code, payload)` pairs; what they mean
//! is the application's business. Handlers run on blocking worker tasks, so
//! an implementation may do slow synchronous work without stalling the link.

use bytes::Bytes;
use thiserror::Error;

use portway_core::codes::{
    STATUS_ACCESS_DENIED, STATUS_COMMAND_NOT_SUPPORTED, STATUS_HANDLER_FAILED,
};

/// Why a handler declined or failed a command. Each variant maps to a wire
/// status; the connection stays up either way.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("command not supported")]
    Unsupported,

    #[error("access denied")]
    AccessDenied,

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn status(&self) -> u32 {
        match self {
            Self::Unsupported => STATUS_COMMAND_NOT_SUPPORTED,
            Self::AccessDenied => STATUS_ACCESS_DENIED,
            Self::Failed(_) => STATUS_HANDLER_FAILED,
        }
    }
}

/// What a resource actually does with forwarded commands.
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle one forwarded command and produce the reply payload.
    ///
    /// Called from a blocking worker task; synchronous work is fine. Errors
    /// become error-status responses, never connection teardown.
    fn handle(&self, code: u32, payload: &[u8]) -> std::result::Result<Bytes, HandlerError>;
}
