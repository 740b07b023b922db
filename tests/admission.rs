//! Admission and lifecycle over real loopback sockets
//!
//! The gatekeeping paths: forged handshakes stay out, identity collisions
//! evict the older session, and the shutdown token stops exactly one thing —
//! the relay it was written for.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::TcpStream;

use portway_client::UserClient;
use portway_crypto::{generate_nonce, Attestation, Challenge, SigningKeypair};
use portway_net::{spawn_writer, FrameReader};
use portway_relay::{Relay, RelayConfig};
use portway_resource::{CommandHandler, HandlerError, ResourceClient, ResourceConfig};

const MAX_FRAME: usize = 1 << 20;

struct Echo;

impl CommandHandler for Echo {
    fn handle(&self, _code: u32, payload: &[u8]) -> Result<Bytes, HandlerError> {
        Ok(Bytes::copy_from_slice(payload))
    }
}

async fn start_relay(dir: &tempfile::TempDir) -> Arc<Relay> {
    let config = RelayConfig {
        host: "127.0.0.1".to_string(),
        resource_port: 0,
        user_port: 0,
        max_frame_size: MAX_FRAME,
        resource_read_timeout: Duration::from_secs(5),
        token_path: dir.path().join("relay.token"),
    };
    Relay::start(config, SigningKeypair::generate())
        .await
        .unwrap()
}

async fn connect_resource(relay: &Relay, keypair: SigningKeypair, name: &str) -> ResourceClient {
    let config = ResourceConfig {
        relay_addr: relay.resource_addr().to_string(),
        name: name.to_string(),
        description: String::new(),
        keepalive: Duration::from_secs(1),
        retry_step: Duration::from_millis(100),
        retry_total: Duration::from_secs(5),
        max_frame_size: MAX_FRAME,
    };
    ResourceClient::connect(config, keypair, Arc::new(Echo))
        .await
        .unwrap()
}

async fn connect_user(relay: &Relay) -> UserClient {
    UserClient::connect(
        &relay.user_addr().to_string(),
        Duration::from_secs(2),
        MAX_FRAME,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_forged_attestation_never_admitted() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(&dir).await;

    // Speak the handshake by hand, signing with a key other than the one we
    // claim to be.
    let stream = TcpStream::connect(relay.resource_addr()).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let (writer, _task) = spawn_writer(write_half, 8);
    let mut reader = FrameReader::new(read_half);

    let cmd = reader.read_command(MAX_FRAME).await.unwrap().unwrap();
    let challenge = Challenge::decode(cmd.data.clone()).unwrap();

    let impostor = SigningKeypair::generate();
    let claimed = SigningKeypair::generate();
    let mut attestation = Attestation::create(
        &impostor,
        &challenge,
        generate_nonce(),
        "trustworthy".to_string(),
        String::new(),
    );
    attestation.resource_pubkey = claimed.public_key_bytes();
    writer
        .send(portway_core::Response::ok(&cmd, attestation.encode()).encode())
        .await
        .unwrap();

    // The relay closes instead of continuing to RELAY_SIGN.
    let next = reader.read_command(MAX_FRAME).await;
    assert!(matches!(next, Ok(None) | Err(_)));

    let user = connect_user(&relay).await;
    assert!(user.list_resources().await.unwrap().is_empty());

    relay.stop();
}

#[tokio::test]
async fn test_identity_collision_evicts_first_session() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(&dir).await;

    let keypair = SigningKeypair::generate();
    let identity = keypair.public_key_bytes();
    let twin = SigningKeypair::from_secret_bytes(&keypair.secret_key_bytes());

    let first = connect_resource(&relay, keypair, "original").await;
    let second = connect_resource(&relay, twin, "replacement").await;

    // The older session is closed from the relay side.
    let deadline = Instant::now() + Duration::from_secs(3);
    while first.is_connected() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!first.is_connected());
    assert!(second.is_connected());

    let user = connect_user(&relay).await;
    let records = user.list_resources().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identity, identity);
    assert_eq!(records[0].name, "replacement");

    relay.stop();
}

#[tokio::test]
async fn test_wrong_token_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(&dir).await;

    let user = connect_user(&relay).await;
    // Wrong token: accepted silently, no effect.
    user.execute_token(&[0u8; 32]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(user.enum_commands().await.is_ok());
    assert!(dir.path().join("relay.token").exists());

    relay.stop();
}

#[tokio::test]
async fn test_exact_token_stops_relay_and_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(&dir).await;
    let token_path = dir.path().join("relay.token");

    let user = connect_user(&relay).await;
    let token = std::fs::read(&token_path).unwrap();
    user.execute_token(&token).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), relay.wait_shutdown())
        .await
        .unwrap();
    relay.stop();
    assert!(!token_path.exists());

    // A fresh user connection finds nobody listening.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let probe = UserClient::connect(
        &relay.user_addr().to_string(),
        Duration::from_millis(500),
        MAX_FRAME,
    )
    .await;
    match probe {
        Err(_) => {}
        Ok(client) => {
            // Connect may still succeed while the OS drains the backlog, but
            // no command can complete.
            assert!(client.enum_commands().await.is_err());
        }
    }
}
