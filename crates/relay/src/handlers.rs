//! User-link command handlers
//!
//! Each handler turns one command into an [`Outcome`]. Lookup failures are
//! business errors reported synchronously; only the forward path defers.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info};

use portway_core::codes::{
    CMD_SEND, STATUS_PEER_GONE, STATUS_RESOURCE_NOT_FOUND, STATUS_WRONG_SYNTAX,
};
use portway_core::{short_identity, Command, ForwardEnvelope, Identity, ResourceRecord};

use crate::dispatch::Outcome;
use crate::server::Relay;
use crate::session::{ResourceSession, UserSession};

pub(crate) async fn enum_commands(
    relay: Arc<Relay>,
    _user: Arc<UserSession>,
    _command: Command,
) -> Outcome {
    let codes = relay.dispatcher.supported_codes();
    let mut data = BytesMut::with_capacity(codes.len() * 4);
    for code in codes {
        data.put_u32(code);
    }
    Outcome::Reply(data.freeze())
}

/// A matching token stops the relay; anything else is silently ignored, so
/// probing the command reveals nothing.
pub(crate) async fn execute_token(
    relay: Arc<Relay>,
    user: Arc<UserSession>,
    command: Command,
) -> Outcome {
    if relay.token.matches(&command.data) {
        info!("Shutdown token presented by user session {}", user.id);
        relay.request_shutdown();
    } else {
        debug!(
            "EXECUTE_TOKEN from user session {} did not match; ignored",
            user.id
        );
    }
    Outcome::Reply(Bytes::new())
}

pub(crate) async fn list_resources(
    relay: Arc<Relay>,
    _user: Arc<UserSession>,
    _command: Command,
) -> Outcome {
    Outcome::Reply(ResourceRecord::encode_list(&relay.registry.list()))
}

fn parse_identity(data: &[u8]) -> Option<Identity> {
    let identity: Identity = data.try_into().ok()?;
    Some(identity)
}

pub(crate) async fn is_resource_present(
    relay: Arc<Relay>,
    user: Arc<UserSession>,
    command: Command,
) -> Outcome {
    let Some(identity) = parse_identity(&command.data) else {
        return Outcome::error(STATUS_WRONG_SYNTAX, "expected a 32-byte identity");
    };
    match relay.registry.get(&identity) {
        Some(resource) => {
            user.bind_resource(&resource);
            let mut data = BytesMut::with_capacity(4);
            data.put_u32(resource.id);
            Outcome::Reply(data.freeze())
        }
        None => Outcome::error(
            STATUS_RESOURCE_NOT_FOUND,
            format!("no resource with identity {}", short_identity(&identity)),
        ),
    }
}

pub(crate) async fn get_resource_info(
    relay: Arc<Relay>,
    user: Arc<UserSession>,
    command: Command,
) -> Outcome {
    let Some(identity) = parse_identity(&command.data) else {
        return Outcome::error(STATUS_WRONG_SYNTAX, "expected a 32-byte identity");
    };
    match relay.registry.get(&identity) {
        Some(resource) => {
            user.bind_resource(&resource);
            Outcome::Reply(resource.record().encode())
        }
        None => Outcome::error(
            STATUS_RESOURCE_NOT_FOUND,
            format!("no resource with identity {}", short_identity(&identity)),
        ),
    }
}

/// Handle-addressed forward: `[handle:4][payload...]`.
pub(crate) async fn send(
    _relay: Arc<Relay>,
    user: Arc<UserSession>,
    command: Command,
) -> Outcome {
    let mut data = command.data.clone();
    if data.len() < 4 {
        return Outcome::error(STATUS_WRONG_SYNTAX, "missing resource handle");
    }
    let handle = data.get_u32();
    let Some(resource) = user.bound_resource(handle) else {
        return Outcome::error(
            STATUS_RESOURCE_NOT_FOUND,
            format!("unknown resource handle {handle}"),
        );
    };
    forward(&user, &resource, command.code, command.index, data).await
}

/// Identity-addressed forward: `[identity:32][payload...]`. Re-issued on the
/// resource link as SEND; relay identities mean nothing to a resource.
pub(crate) async fn send_to(
    relay: Arc<Relay>,
    user: Arc<UserSession>,
    command: Command,
) -> Outcome {
    let mut data = command.data.clone();
    if data.len() < 32 {
        return Outcome::error(STATUS_WRONG_SYNTAX, "missing target identity");
    }
    let mut identity: Identity = [0; 32];
    identity.copy_from_slice(&data.split_to(32));
    let Some(resource) = relay.registry.get(&identity) else {
        return Outcome::error(
            STATUS_RESOURCE_NOT_FOUND,
            format!("no resource with identity {}", short_identity(&identity)),
        );
    };
    user.bind_resource(&resource);
    forward(&user, &resource, CMD_SEND, command.index, data).await
}

/// Wrap `payload` in a forward envelope and queue it on the resource link.
///
/// Succeeding means "no reply yet": the resource's answer comes back through
/// the return path. A target that died since it was resolved is a synchronous
/// business error, and the stale binding is dropped on the spot.
async fn forward(
    user: &Arc<UserSession>,
    resource: &Arc<ResourceSession>,
    code: u32,
    user_index: u32,
    payload: Bytes,
) -> Outcome {
    if resource.writer.is_closed() {
        user.unbind_resource(resource.id);
        return Outcome::error(
            STATUS_PEER_GONE,
            format!("resource session {} is gone", resource.id),
        );
    }

    resource.bind_user(user);
    let envelope = ForwardEnvelope::new(user.id, user_index, payload);
    let out = Command::new(resource.next_index(), code, envelope.encode());
    match resource.writer.send(out.encode()).await {
        Ok(()) => Outcome::Deferred,
        Err(_) => {
            user.unbind_resource(resource.id);
            Outcome::error(
                STATUS_PEER_GONE,
                format!("resource session {} is gone", resource.id),
            )
        }
    }
}
