//! The reverse client
//!
//! Dial, authenticate, serve. The dial retries with backoff because the
//! relay may be restarting; everything after admission is reactive — the
//! resource only ever sends responses, the periodic keep-alive included.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use portway_core::codes::{
    CMD_ENUM_COMMANDS, CMD_RELAY_SIGN, CMD_WHO_ARE_YOU, STATUS_COMMAND_NOT_SUPPORTED,
    STATUS_HANDLER_FAILED, STATUS_OK, STATUS_WRONG_SYNTAX,
};
use portway_core::{is_forward_code, response_code, Command, ForwardEnvelope, Identity, Response};
use portway_crypto::{generate_nonce, Attestation, Challenge, RelayProof, SigningKeypair};
use portway_net::{connect_hard, spawn_writer, FrameReader, PeerWriter, DEFAULT_WRITE_QUEUE_DEPTH};

use crate::{CommandHandler, ResourceError, Result};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub relay_addr: String,
    pub name: String,
    pub description: String,
    /// Interval between unsolicited keep-alive responses. Must stay below the
    /// relay's resource read timeout.
    pub keepalive: Duration,
    pub retry_step: Duration,
    pub retry_total: Duration,
    pub max_frame_size: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:9710".to_string(),
            name: "resource".to_string(),
            description: String::new(),
            keepalive: Duration::from_secs(30),
            retry_step: Duration::from_secs(2),
            retry_total: Duration::from_secs(300),
            max_frame_size: 1024 * 1024,
        }
    }
}

/// A live registration with a relay.
pub struct ResourceClient {
    identity: Identity,
    writer: PeerWriter,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    aux_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResourceClient {
    /// Dial the relay, complete the mutual handshake, and start serving
    /// forwarded commands through `handler`.
    pub async fn connect(
        config: ResourceConfig,
        keypair: SigningKeypair,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Self> {
        let stream = connect_hard(&config.relay_addr, config.retry_step, config.retry_total).await?;
        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer(write_half, DEFAULT_WRITE_QUEUE_DEPTH);
        let mut reader = FrameReader::new(read_half);

        handshake(&mut reader, &writer, &keypair, &config).await?;
        info!(
            "Registered with relay {} as '{}'",
            config.relay_addr, config.name
        );

        let serve_task = tokio::spawn(serve(
            Arc::clone(&handler),
            writer.clone(),
            reader,
            config.max_frame_size,
        ));
        let keepalive_task = tokio::spawn(keepalive(writer.clone(), config.keepalive));

        Ok(Self {
            identity: keypair.public_key_bytes(),
            writer,
            serve_task: Mutex::new(Some(serve_task)),
            aux_tasks: Mutex::new(vec![keepalive_task, writer_task]),
        })
    }

    /// The public key this client registered under.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// False once the link to the relay has died.
    pub fn is_connected(&self) -> bool {
        !self.writer.is_closed()
    }

    /// Drop the relay connection and stop serving.
    pub fn stop(&self) {
        if let Some(task) = self.serve_task.lock().unwrap().take() {
            task.abort();
        }
        for task in self.aux_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        info!("Resource client stopped");
    }

    /// Resolves when the serve loop has ended (relay gone or `stop` called).
    pub async fn wait_done(&self) {
        let task = self.serve_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ResourceClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resource side of the admission handshake. The relay drives; this side
/// answers, and it verifies the relay's proof before agreeing to serve.
async fn handshake(
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &PeerWriter,
    keypair: &SigningKeypair,
    config: &ResourceConfig,
) -> Result<()> {
    let max = config.max_frame_size;

    let cmd = handshake_step(reader, max).await?;
    if cmd.code != CMD_WHO_ARE_YOU {
        return Err(ResourceError::Handshake("expected identity challenge"));
    }
    let challenge = Challenge::decode(cmd.data.clone())?;
    let attestation = Attestation::create(
        keypair,
        &challenge,
        generate_nonce(),
        config.name.clone(),
        config.description.clone(),
    );
    writer
        .send(Response::ok(&cmd, attestation.encode()).encode())
        .await?;

    let cmd = handshake_step(reader, max).await?;
    if cmd.code != CMD_RELAY_SIGN {
        return Err(ResourceError::Handshake("expected relay proof"));
    }
    let proof = RelayProof::decode(cmd.data.clone())?;
    if !proof.verify(
        &challenge,
        &attestation.resource_pubkey,
        &attestation.resource_nonce,
    ) {
        return Err(ResourceError::RelayNotTrusted);
    }
    writer.send(Response::ok(&cmd, Bytes::new()).encode()).await?;
    Ok(())
}

async fn handshake_step(reader: &mut FrameReader<OwnedReadHalf>, max: usize) -> Result<Command> {
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_command(max)).await {
        Ok(Ok(Some(cmd))) => Ok(cmd),
        Ok(Ok(None)) => Err(ResourceError::Handshake("connection closed")),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ResourceError::Handshake("timed out")),
    }
}

async fn serve(
    handler: Arc<dyn CommandHandler>,
    writer: PeerWriter,
    mut reader: FrameReader<OwnedReadHalf>,
    max: usize,
) {
    loop {
        match reader.read_command(max).await {
            Ok(Some(command)) => {
                // One task per command; a slow handler never blocks the link.
                let handler = Arc::clone(&handler);
                let writer = writer.clone();
                tokio::spawn(handle_command(handler, writer, command));
            }
            Ok(None) => {
                info!("Relay closed the connection");
                break;
            }
            Err(e) => {
                warn!("Resource link read failed: {}", e);
                break;
            }
        }
    }
}

async fn handle_command(handler: Arc<dyn CommandHandler>, writer: PeerWriter, command: Command) {
    if !is_forward_code(command.code) {
        debug!("Unsupported command {:#010x} from relay", command.code);
        let _ = writer
            .send(Response::error(&command, STATUS_COMMAND_NOT_SUPPORTED).encode())
            .await;
        return;
    }

    let envelope = match ForwardEnvelope::decode(command.data.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Malformed forward envelope: {}", e);
            let _ = writer
                .send(Response::error(&command, STATUS_WRONG_SYNTAX).encode())
                .await;
            return;
        }
    };

    let code = command.code;
    let payload = envelope.payload.clone();
    let worker = Arc::clone(&handler);
    let result = tokio::task::spawn_blocking(move || worker.handle(code, &payload)).await;

    let (status, reply) = match result {
        Ok(Ok(reply)) => (STATUS_OK, reply),
        Ok(Err(e)) => {
            debug!("Handler declined command {:#010x}: {}", code, e);
            (e.status(), Bytes::new())
        }
        Err(e) => {
            warn!("Handler panicked on command {:#010x}: {}", code, e);
            (STATUS_HANDLER_FAILED, Bytes::new())
        }
    };

    // The envelope goes back around the reply, errors included, so the relay
    // can route it to the right user.
    let back = ForwardEnvelope::new(envelope.user_handle, envelope.user_index, reply);
    let response = Response::new(command.index, response_code(code), status, back.encode());
    let _ = writer.send(response.encode()).await;
}

/// Emit an unsolicited empty ENUM_COMMANDS-family response at a fixed period
/// so the relay's idle timeout never fires on a healthy link.
async fn keepalive(writer: PeerWriter, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let frame =
            Response::new(0, response_code(CMD_ENUM_COMMANDS), STATUS_OK, Bytes::new()).encode();
        if writer.send(frame).await.is_err() {
            debug!("Keep-alive send failed; link is gone");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HandlerError;
    use portway_core::codes::CMD_SEND;
    use tokio::net::{TcpListener, TcpStream};

    struct Echo;

    impl CommandHandler for Echo {
        fn handle(&self, _code: u32, payload: &[u8]) -> std::result::Result<Bytes, HandlerError> {
            Ok(Bytes::copy_from_slice(payload))
        }
    }

    struct Refuser;

    impl CommandHandler for Refuser {
        fn handle(&self, _code: u32, _payload: &[u8]) -> std::result::Result<Bytes, HandlerError> {
            Err(HandlerError::Failed("nope".to_string()))
        }
    }

    struct FakeRelay {
        reader: FrameReader<OwnedReadHalf>,
        writer: PeerWriter,
        #[allow(dead_code)]
        writer_task: JoinHandle<()>,
    }

    /// Accept one resource connection and drive the relay side of the
    /// handshake, optionally signing the proof with the wrong key.
    async fn accept_and_admit(
        listener: TcpListener,
        relay_keys: &SigningKeypair,
        proof_keys: &SigningKeypair,
    ) -> std::result::Result<FakeRelay, &'static str> {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer(write_half, 8);
        let mut reader = FrameReader::new(read_half);

        let challenge = Challenge {
            relay_pubkey: relay_keys.public_key_bytes(),
            relay_nonce: generate_nonce(),
        };
        writer
            .send(Command::new(0, CMD_WHO_ARE_YOU, challenge.encode()).encode())
            .await
            .unwrap();

        let resp = reader.read_response(1 << 20).await.unwrap().unwrap();
        let attestation = Attestation::decode(resp.data).unwrap();
        if !attestation.verify(&challenge) {
            return Err("bad attestation");
        }

        let proof = RelayProof::create(proof_keys, &challenge.relay_nonce, &attestation);
        writer
            .send(Command::new(1, CMD_RELAY_SIGN, proof.encode()).encode())
            .await
            .unwrap();

        match reader.read_response(1 << 20).await {
            Ok(Some(resp)) if resp.is_ok() => Ok(FakeRelay {
                reader,
                writer,
                writer_task,
            }),
            _ => Err("resource refused the proof"),
        }
    }

    fn quick_config(addr: String) -> ResourceConfig {
        ResourceConfig {
            relay_addr: addr,
            name: "echo".to_string(),
            retry_step: Duration::from_millis(100),
            retry_total: Duration::from_secs(5),
            ..ResourceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_handshake_and_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let relay_side = tokio::spawn(async move {
            let keys = SigningKeypair::generate();
            accept_and_admit(listener, &keys, &keys).await.unwrap()
        });

        let client = ResourceClient::connect(
            quick_config(addr),
            SigningKeypair::generate(),
            Arc::new(Echo),
        )
        .await
        .unwrap();
        assert!(client.is_connected());

        let mut relay = relay_side.await.unwrap();
        let envelope = ForwardEnvelope::new(7, 9, &b"ping"[..]);
        relay
            .writer
            .send(Command::new(2, CMD_SEND, envelope.encode()).encode())
            .await
            .unwrap();

        let resp = relay.reader.read_response(1 << 20).await.unwrap().unwrap();
        assert_eq!(resp.index, 2);
        assert_eq!(resp.code, response_code(CMD_SEND));
        assert!(resp.is_ok());
        let back = ForwardEnvelope::decode(resp.data).unwrap();
        assert_eq!(back.user_handle, 7);
        assert_eq!(back.user_index, 9);
        assert_eq!(&back.payload[..], b"ping");
    }

    #[tokio::test]
    async fn test_untrusted_relay_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let relay_side = tokio::spawn(async move {
            let announced = SigningKeypair::generate();
            let actual = SigningKeypair::generate();
            // The proof is signed by a key other than the announced one.
            accept_and_admit(listener, &announced, &actual).await
        });

        let result = ResourceClient::connect(
            quick_config(addr),
            SigningKeypair::generate(),
            Arc::new(Echo),
        )
        .await;
        assert!(matches!(result, Err(ResourceError::RelayNotTrusted)));
        assert!(relay_side.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let relay_side = tokio::spawn(async move {
            let keys = SigningKeypair::generate();
            accept_and_admit(listener, &keys, &keys).await.unwrap()
        });

        let _client = ResourceClient::connect(
            quick_config(addr),
            SigningKeypair::generate(),
            Arc::new(Refuser),
        )
        .await
        .unwrap();

        let mut relay = relay_side.await.unwrap();
        let envelope = ForwardEnvelope::new(1, 2, &b"x"[..]);
        relay
            .writer
            .send(Command::new(2, CMD_SEND, envelope.encode()).encode())
            .await
            .unwrap();

        let resp = relay.reader.read_response(1 << 20).await.unwrap().unwrap();
        assert_eq!(resp.status, STATUS_HANDLER_FAILED);
        // Routing information survives the failure.
        let back = ForwardEnvelope::decode(resp.data).unwrap();
        assert_eq!(back.user_handle, 1);
        assert_eq!(back.user_index, 2);
        assert!(back.payload.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_not_supported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let relay_side = tokio::spawn(async move {
            let keys = SigningKeypair::generate();
            accept_and_admit(listener, &keys, &keys).await.unwrap()
        });

        let _client = ResourceClient::connect(
            quick_config(addr),
            SigningKeypair::generate(),
            Arc::new(Echo),
        )
        .await
        .unwrap();

        let mut relay = relay_side.await.unwrap();
        relay
            .writer
            .send(Command::new(5, 0xC0FF_EE00, Bytes::new()).encode())
            .await
            .unwrap();

        let resp = relay.reader.read_response(1 << 20).await.unwrap().unwrap();
        assert_eq!(resp.index, 5);
        assert_eq!(resp.status, STATUS_COMMAND_NOT_SUPPORTED);
    }
}
