//! Command dispatch on the user link
//!
//! A `code → handler` table built once at startup. Handlers return an
//! [`Outcome`] value: business failures are statuses, not errors, and the
//! forward path's "no reply yet" is a first-class result rather than a
//! sentinel.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use portway_core::codes::{
    CMD_ENUM_COMMANDS, CMD_EXECUTE_TOKEN, CMD_GET_RESOURCE_INFO, CMD_INIT_SM,
    CMD_IS_RESOURCE_PRESENT, CMD_LIST_RESOURCES, CMD_SEND, CMD_SEND_ENCRYPTED, CMD_SEND_TO,
    STATUS_COMMAND_NOT_SUPPORTED,
};
use portway_core::Command;

use crate::handlers;
use crate::server::Relay;
use crate::session::UserSession;

/// What a handler decided about one command.
#[derive(Debug)]
pub enum Outcome {
    /// Reply immediately with a success response carrying this payload.
    Reply(Bytes),
    /// No reply yet: the answer will arrive later via the return path.
    Deferred,
    /// Reply immediately with an error status. The connection stays usable.
    Error { status: u32, detail: String },
}

impl Outcome {
    pub fn error(status: u32, detail: impl Into<String>) -> Self {
        Self::Error {
            status,
            detail: detail.into(),
        }
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;
pub type HandlerFn = fn(Arc<Relay>, Arc<UserSession>, Command) -> HandlerFuture;

/// The user-link handler table.
pub struct Dispatcher {
    table: HashMap<u32, HandlerFn>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut table: HashMap<u32, HandlerFn> = HashMap::new();
        table.insert(CMD_ENUM_COMMANDS, |r, u, c| {
            Box::pin(handlers::enum_commands(r, u, c))
        });
        table.insert(CMD_EXECUTE_TOKEN, |r, u, c| {
            Box::pin(handlers::execute_token(r, u, c))
        });
        table.insert(CMD_LIST_RESOURCES, |r, u, c| {
            Box::pin(handlers::list_resources(r, u, c))
        });
        table.insert(CMD_IS_RESOURCE_PRESENT, |r, u, c| {
            Box::pin(handlers::is_resource_present(r, u, c))
        });
        table.insert(CMD_GET_RESOURCE_INFO, |r, u, c| {
            Box::pin(handlers::get_resource_info(r, u, c))
        });
        table.insert(CMD_SEND_TO, |r, u, c| Box::pin(handlers::send_to(r, u, c)));
        // The three handle-addressed forward commands share one handler; the
        // command code is preserved across the hop so the resource can tell
        // cryptogram traffic apart.
        table.insert(CMD_SEND, |r, u, c| Box::pin(handlers::send(r, u, c)));
        table.insert(CMD_SEND_ENCRYPTED, |r, u, c| Box::pin(handlers::send(r, u, c)));
        table.insert(CMD_INIT_SM, |r, u, c| Box::pin(handlers::send(r, u, c)));
        Self { table }
    }

    /// Route one command. Unknown codes answer with a status, never a crash.
    pub async fn dispatch(
        &self,
        relay: Arc<Relay>,
        user: Arc<UserSession>,
        command: Command,
    ) -> Outcome {
        match self.table.get(&command.code) {
            Some(handler) => handler(relay, user, command).await,
            None => {
                debug!("Unsupported command code {:#010x}", command.code);
                Outcome::error(
                    STATUS_COMMAND_NOT_SUPPORTED,
                    format!("command {:#010x} not supported", command.code),
                )
            }
        }
    }

    /// The codes this dispatcher answers, sorted, for ENUM_COMMANDS.
    pub fn supported_codes(&self) -> Vec<u32> {
        let mut codes: Vec<u32> = self.table.keys().copied().collect();
        codes.sort_unstable();
        codes
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
