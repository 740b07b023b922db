//! Relay server
//!
//! Owns the two listening ports, the registry, and the shutdown plumbing.
//! User connections run a command loop through the dispatcher; resource
//! connections run the admission handshake and then only ever send responses,
//! which are demultiplexed back to the originating users.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use portway_core::codes::{CMD_RELAY_SIGN, CMD_WHO_ARE_YOU};
use portway_core::{
    command_code, is_forward_code, response_code, short_identity, Command, ForwardEnvelope,
    Response,
};
use portway_crypto::{generate_nonce, Attestation, Challenge, RelayProof, SigningKeypair};
use portway_net::{spawn_writer, FrameReader, SocketServer, DEFAULT_WRITE_QUEUE_DEPTH};

use crate::dispatch::{Dispatcher, Outcome};
use crate::registry::Registry;
use crate::session::{allocate_handle, ResourceSession, UserSession};
use crate::token::ShutdownToken;
use crate::{RelayError, Result};

/// The handshake occupies command indices 0 and 1 on the resource link;
/// forwarded traffic starts above them.
const FIRST_FORWARD_INDEX: u32 = 2;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub resource_port: u16,
    pub user_port: u16,
    pub max_frame_size: usize,
    /// Bounds both handshake steps and the idle gap between resource frames;
    /// the keep-alive interval must stay below it.
    pub resource_read_timeout: Duration,
    pub token_path: std::path::PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            resource_port: 9710,
            user_port: 9711,
            max_frame_size: 1024 * 1024,
            resource_read_timeout: Duration::from_secs(120),
            token_path: std::path::PathBuf::from("portway-relay.token"),
        }
    }
}

pub struct Relay {
    pub(crate) config: RelayConfig,
    pub(crate) keypair: SigningKeypair,
    pub(crate) registry: Registry,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) token: ShutdownToken,
    shutdown_tx: watch::Sender<bool>,
    user_server: Mutex<Option<SocketServer>>,
    resource_server: Mutex<Option<SocketServer>>,
    user_addr: OnceLock<SocketAddr>,
    resource_addr: OnceLock<SocketAddr>,
}

impl Relay {
    /// Bind both ports and start serving. Port 0 picks free ports, reported
    /// by [`user_addr`](Self::user_addr) and
    /// [`resource_addr`](Self::resource_addr).
    pub async fn start(config: RelayConfig, keypair: SigningKeypair) -> Result<Arc<Self>> {
        let token = ShutdownToken::create(&config.token_path).map_err(|source| {
            RelayError::Token {
                path: config.token_path.clone(),
                source,
            }
        })?;
        let (shutdown_tx, _) = watch::channel(false);

        let relay = Arc::new(Self {
            config,
            keypair,
            registry: Registry::new(),
            dispatcher: Dispatcher::new(),
            token,
            shutdown_tx,
            user_server: Mutex::new(None),
            resource_server: Mutex::new(None),
            user_addr: OnceLock::new(),
            resource_addr: OnceLock::new(),
        });

        let resource_bind = relay.bind_addr(relay.config.resource_port)?;
        let r = Arc::clone(&relay);
        let resource_server = SocketServer::bind(resource_bind, move |stream, peer| {
            let relay = Arc::clone(&r);
            tokio::spawn(run_resource_conn(relay, stream, peer));
        })
        .await
        .map_err(|source| RelayError::Bind {
            addr: resource_bind.to_string(),
            source,
        })?;
        let _ = relay.resource_addr.set(resource_server.local_addr());
        *relay.resource_server.lock().unwrap() = Some(resource_server);

        let user_bind = relay.bind_addr(relay.config.user_port)?;
        let r = Arc::clone(&relay);
        let user_server = SocketServer::bind(user_bind, move |stream, peer| {
            let relay = Arc::clone(&r);
            tokio::spawn(run_user_conn(relay, stream, peer));
        })
        .await
        .map_err(|source| RelayError::Bind {
            addr: user_bind.to_string(),
            source,
        })?;
        let _ = relay.user_addr.set(user_server.local_addr());
        *relay.user_server.lock().unwrap() = Some(user_server);

        info!(
            "Relay up: users on {}, resources on {}, identity {}",
            relay.user_addr(),
            relay.resource_addr(),
            short_identity(&relay.keypair.public_key_bytes()),
        );
        Ok(relay)
    }

    fn bind_addr(&self, port: u16) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.config.host, port);
        addr.parse().map_err(|_| RelayError::Bind {
            addr: addr.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid listen address {addr}"),
            ),
        })
    }

    /// The bound user-port address. Only valid after `start` returned.
    pub fn user_addr(&self) -> SocketAddr {
        *self.user_addr.get().expect("relay not started")
    }

    /// The bound resource-port address. Only valid after `start` returned.
    pub fn resource_addr(&self) -> SocketAddr {
        *self.resource_addr.get().expect("relay not started")
    }

    /// Signal every connection loop to wind down. Idempotent.
    pub fn request_shutdown(&self) {
        // send_replace stores the value even when nobody has subscribed yet,
        // so a later wait_shutdown still observes it.
        self.shutdown_tx.send_replace(true);
    }

    /// Resolves once `request_shutdown` has been called (by `stop`, by a
    /// valid EXECUTE_TOKEN, or by a signal handler).
    pub async fn wait_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop listening, close every live session, and remove the token file.
    pub fn stop(&self) {
        self.request_shutdown();
        if let Some(mut server) = self.user_server.lock().unwrap().take() {
            server.stop();
        }
        if let Some(mut server) = self.resource_server.lock().unwrap().take() {
            server.stop();
        }
        for session in self.registry.drain() {
            session.close();
        }
        self.token.remove();
        info!("Relay stopped");
    }
}

async fn run_user_conn(relay: Arc<Relay>, stream: TcpStream, peer: SocketAddr) {
    let max = relay.config.max_frame_size;
    let (read_half, write_half) = stream.into_split();
    let (writer, writer_task) = spawn_writer(write_half, DEFAULT_WRITE_QUEUE_DEPTH);
    let mut reader = FrameReader::new(read_half);
    let user = UserSession::new(allocate_handle(), writer);
    debug!("User session {} connected from {}", user.id, peer);

    let mut shutdown = relay.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = user.wait_closed() => break,
            _ = shutdown.changed() => break,
            read = reader.read_command(max) => match read {
                Ok(Some(command)) => {
                    // Handlers run off the read loop so a slow lookup or a
                    // full resource queue never stalls this user's reads.
                    let relay = Arc::clone(&relay);
                    let user = Arc::clone(&user);
                    tokio::spawn(handle_user_command(relay, user, command));
                }
                Ok(None) => {
                    debug!("User session {} closed by peer", user.id);
                    break;
                }
                Err(e) => {
                    debug!("User session {} read failed: {}", user.id, e);
                    break;
                }
            }
        }
    }
    writer_task.abort();
    debug!("User session {} ended", user.id);
}

async fn handle_user_command(relay: Arc<Relay>, user: Arc<UserSession>, command: Command) {
    let index = command.index;
    let code = command.code;
    let outcome = relay
        .dispatcher
        .dispatch(Arc::clone(&relay), Arc::clone(&user), command)
        .await;

    let response = match outcome {
        Outcome::Reply(data) => Response::new(
            index,
            response_code(code),
            portway_core::codes::STATUS_OK,
            data,
        ),
        Outcome::Deferred => return,
        Outcome::Error { status, detail } => {
            debug!(
                "Command {:#010x} from user session {} failed: {}",
                code, user.id, detail
            );
            Response::new(index, response_code(code), status, bytes::Bytes::new())
        }
    };
    if user.writer.send(response.encode()).await.is_err() {
        user.close();
    }
}

async fn run_resource_conn(relay: Arc<Relay>, stream: TcpStream, peer: SocketAddr) {
    match admit_resource(&relay, stream).await {
        Ok((session, reader, writer_task)) => {
            serve_resource(relay, session, reader, writer_task).await;
        }
        Err(e) => warn!("Resource handshake with {} failed: {}", peer, e),
    }
}

type AdmittedResource = (
    Arc<ResourceSession>,
    FrameReader<OwnedReadHalf>,
    tokio::task::JoinHandle<()>,
);

/// Relay side of the admission handshake.
///
/// Any deviation — wrong index, wrong code, error status, bad signature,
/// malformed payload, timeout — rejects the connection before it touches the
/// registry.
async fn admit_resource(relay: &Arc<Relay>, stream: TcpStream) -> Result<AdmittedResource> {
    let max = relay.config.max_frame_size;
    let timeout = relay.config.resource_read_timeout;
    let (read_half, write_half) = stream.into_split();
    let (writer, writer_task) = spawn_writer(write_half, DEFAULT_WRITE_QUEUE_DEPTH);
    let mut reader = FrameReader::new(read_half);

    let challenge = Challenge {
        relay_pubkey: relay.keypair.public_key_bytes(),
        relay_nonce: generate_nonce(),
    };
    writer
        .send(Command::new(0, CMD_WHO_ARE_YOU, challenge.encode()).encode())
        .await?;

    let resp = handshake_step(&mut reader, max, timeout).await?;
    if resp.index != 0 || resp.code != response_code(CMD_WHO_ARE_YOU) || !resp.is_ok() {
        return Err(RelayError::HandshakeRejected("unexpected identity reply"));
    }
    let attestation = Attestation::decode(resp.data)?;
    if !attestation.verify(&challenge) {
        return Err(RelayError::HandshakeRejected("attestation signature invalid"));
    }

    let proof = RelayProof::create(&relay.keypair, &challenge.relay_nonce, &attestation);
    writer
        .send(Command::new(1, CMD_RELAY_SIGN, proof.encode()).encode())
        .await?;
    let resp = handshake_step(&mut reader, max, timeout).await?;
    if resp.index != 1 || resp.code != response_code(CMD_RELAY_SIGN) || !resp.is_ok() {
        return Err(RelayError::HandshakeRejected("relay proof not acknowledged"));
    }

    let session = ResourceSession::new(
        allocate_handle(),
        attestation.resource_pubkey,
        attestation.name,
        attestation.description,
        writer,
        FIRST_FORWARD_INDEX,
    );
    if let Some(evicted) = relay.registry.admit(Arc::clone(&session)) {
        info!(
            "Identity {} reconnected; evicting session {}",
            short_identity(&session.identity),
            evicted.id
        );
        evicted.close();
    }
    info!(
        "Resource '{}' admitted as session {} (identity {})",
        session.name,
        session.id,
        short_identity(&session.identity)
    );
    Ok((session, reader, writer_task))
}

async fn handshake_step(
    reader: &mut FrameReader<OwnedReadHalf>,
    max: usize,
    timeout: Duration,
) -> Result<Response> {
    match tokio::time::timeout(timeout, reader.read_response(max)).await {
        Ok(Ok(Some(resp))) => Ok(resp),
        Ok(Ok(None)) => Err(RelayError::HandshakeRejected("connection closed")),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(RelayError::HandshakeTimeout),
    }
}

async fn serve_resource(
    relay: Arc<Relay>,
    session: Arc<ResourceSession>,
    mut reader: FrameReader<OwnedReadHalf>,
    writer_task: tokio::task::JoinHandle<()>,
) {
    let max = relay.config.max_frame_size;
    let read_timeout = relay.config.resource_read_timeout;
    let mut shutdown = relay.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = session.wait_closed() => break,
            _ = shutdown.changed() => break,
            read = tokio::time::timeout(read_timeout, reader.read_response(max)) => match read {
                Ok(Ok(Some(response))) => {
                    if !route_resource_response(&session, response) {
                        break;
                    }
                }
                Ok(Ok(None)) => {
                    debug!("Resource session {} closed by peer", session.id);
                    break;
                }
                Ok(Err(e)) => {
                    warn!("Resource session {} read failed: {}", session.id, e);
                    break;
                }
                Err(_) => {
                    warn!(
                        "Resource session {} silent for {:?}; dropping",
                        session.id, read_timeout
                    );
                    break;
                }
            }
        }
    }

    if relay
        .registry
        .remove_if_current(&session.identity, session.id)
    {
        info!(
            "Resource '{}' (session {}) unregistered",
            session.name, session.id
        );
    }
    session.close();
    // The registry no longer holds the session, but a user's binding cache
    // might; aborting the writer closes the socket now rather than when the
    // last stale binding is pruned.
    writer_task.abort();
}

/// Route one frame off the resource link. Returns false when the frame is a
/// protocol violation that must end the session.
fn route_resource_response(session: &Arc<ResourceSession>, response: Response) -> bool {
    let code = command_code(response.code);
    if !is_forward_code(code) {
        // Unsolicited non-forward responses are the keep-alive; nothing to
        // route.
        debug!(
            "Resource session {} sent non-forward response {:#010x}; ignored",
            session.id, response.code
        );
        return true;
    }

    let envelope = match ForwardEnvelope::decode(response.data) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(
                "Resource session {} sent malformed return envelope: {}",
                session.id, e
            );
            return false;
        }
    };

    let Some(user) = session.bound_user(envelope.user_handle) else {
        debug!(
            "Resource session {} answered user {} who is gone; dropped",
            session.id, envelope.user_handle
        );
        return true;
    };

    // The user sees which resource answered: the session handle is prepended
    // to the returned payload.
    let mut data = BytesMut::with_capacity(4 + envelope.payload.len());
    data.put_u32(session.id);
    data.put_slice(&envelope.payload);
    // Never wait on a user's queue here: this runs on the resource's read
    // loop, and every user bound to this resource shares it. A user that has
    // stopped draining its queue is cut loose instead.
    let out = Response::new(envelope.user_index, response.code, response.status, data.freeze());
    if let Err(e) = user.writer.try_send(out.encode()) {
        debug!(
            "User session {} cannot take replies ({}); unbinding",
            user.id, e
        );
        session.unbind_user(envelope.user_handle);
        user.close();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> RelayConfig {
        RelayConfig {
            host: "127.0.0.1".to_string(),
            resource_port: 0,
            user_port: 0,
            token_path: dir.path().join("relay.token"),
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_binds_both_ports_and_writes_token() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let relay = Relay::start(config.clone(), SigningKeypair::generate())
            .await
            .unwrap();

        assert_ne!(relay.user_addr().port(), 0);
        assert_ne!(relay.resource_addr().port(), 0);
        assert_ne!(relay.user_addr().port(), relay.resource_addr().port());
        assert!(config.token_path.exists());

        relay.stop();
        assert!(!config.token_path.exists());
    }

    #[tokio::test]
    async fn test_stop_resolves_wait_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let relay = Relay::start(test_config(&dir), SigningKeypair::generate())
            .await
            .unwrap();

        let waiter = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.wait_shutdown().await })
        };
        relay.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_request_without_waiters_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let relay = Relay::start(test_config(&dir), SigningKeypair::generate())
            .await
            .unwrap();

        // Nobody has subscribed when the request lands; it must still stick.
        relay.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), relay.wait_shutdown())
            .await
            .unwrap();
        relay.stop();
    }

    #[tokio::test]
    async fn test_full_user_queue_does_not_stall_return_routing() {
        use portway_core::codes::{CMD_SEND, STATUS_OK};

        // A user that never drains its socket: tiny buffer, depth-1 queue,
        // filled to the brim.
        let (io, _held_open) = tokio::io::duplex(16);
        let (writer, _task) = spawn_writer(io, 1);
        let user = UserSession::new(allocate_handle(), writer);
        while user.writer.try_send(bytes::Bytes::from(vec![0u8; 64])).is_ok() {}

        let (res_io, _res_peer) = tokio::io::duplex(1024);
        let (res_writer, _res_task) = spawn_writer(res_io, 8);
        let session = ResourceSession::new(
            allocate_handle(),
            [7u8; 32],
            "res".to_string(),
            String::new(),
            res_writer,
            FIRST_FORWARD_INDEX,
        );
        session.bind_user(&user);

        let envelope = ForwardEnvelope::new(user.id, 9, bytes::Bytes::from_static(b"late"));
        let reply = Response::new(2, response_code(CMD_SEND), STATUS_OK, envelope.encode());

        // Routing must not wait on the stuck queue; the user is cut loose and
        // the resource link stays usable.
        assert!(route_resource_response(&session, reply));
        assert!(session.bound_user(user.id).is_none());
        tokio::time::timeout(Duration::from_secs(1), user.wait_closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_garbage_on_user_port_is_contained() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let relay = Relay::start(test_config(&dir), SigningKeypair::generate())
            .await
            .unwrap();

        // A violating user connection dies alone; the relay keeps serving.
        let mut bad = TcpStream::connect(relay.user_addr()).await.unwrap();
        let huge_len = Command::new(0, 0xC000_0021, bytes::Bytes::new());
        let mut frame = BytesMut::from(&huge_len.encode()[..]);
        frame[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        bad.write_all(&frame).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(TcpStream::connect(relay.user_addr()).await.is_ok());
        relay.stop();
    }
}
