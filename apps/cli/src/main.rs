//! Portway command-line entry point
//!
//! One binary for every role: run a relay, run a demo echo resource, and the
//! user-side operations (list, send, remote shutdown).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::info;

use portway_client::UserClient;
use portway_core::codes::CMD_SEND;
use portway_core::Identity;
use portway_crypto::{default_key_path, fingerprint, load_or_generate_keypair};
use portway_relay::{Relay, RelayConfig};
use portway_resource::{CommandHandler, HandlerError, ResourceClient, ResourceConfig};
use portway_settings::{RelaySettings, ResourceSettings, Settings};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "portway", version, about = "TCP message relay for NAT-bound resources")]
struct Cli {
    /// Settings file (default: ~/.portway/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the relay process
    Relay,
    /// Run a demo resource that echoes SEND payloads back
    Resource {
        /// Override the configured display name
        #[arg(long)]
        name: Option<String>,
        /// Override the configured description
        #[arg(long)]
        description: Option<String>,
    },
    /// List the resources registered on a relay
    Resources {
        /// Relay user-port address (default: 127.0.0.1:<configured user port>)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Send a payload to a resource and print its reply
    Send {
        /// Target identity: 64 hex characters
        identity: String,
        /// Payload text
        payload: String,
        #[arg(long)]
        addr: Option<String>,
    },
    /// Stop a running relay using its shutdown token file
    Shutdown {
        /// Token file the relay wrote at startup
        #[arg(long)]
        token_file: Option<PathBuf>,
        #[arg(long)]
        addr: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load_or_default()?,
    };

    if matches!(cli.command, Cmd::Relay) && settings.relay.log_to_file {
        portway_logging::init_with_file(&settings.relay.log_path)
            .with_context(|| format!("cannot open log file {:?}", settings.relay.log_path))?;
    } else {
        portway_logging::init();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.relay.worker_threads)
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(run(cli.command, settings))
}

async fn run(command: Cmd, settings: Settings) -> Result<()> {
    match command {
        Cmd::Relay => run_relay(settings.relay).await,
        Cmd::Resource { name, description } => {
            run_resource(settings.resource, name, description).await
        }
        Cmd::Resources { addr } => list_resources(user_addr(&settings, addr)).await,
        Cmd::Send {
            identity,
            payload,
            addr,
        } => send(user_addr(&settings, addr), &identity, &payload).await,
        Cmd::Shutdown { token_file, addr } => {
            let token_file = token_file.unwrap_or_else(|| settings.relay.token_path.clone());
            shutdown(user_addr(&settings, addr), &token_file).await
        }
    }
}

fn user_addr(settings: &Settings, addr: Option<String>) -> String {
    addr.unwrap_or_else(|| format!("127.0.0.1:{}", settings.relay.user_port))
}

async fn run_relay(settings: RelaySettings) -> Result<()> {
    let keyfile = settings.keyfile.clone().unwrap_or_else(default_key_path);
    let keypair = load_or_generate_keypair(&keyfile)?;

    let config = RelayConfig {
        host: settings.host,
        resource_port: settings.resource_port,
        user_port: settings.user_port,
        max_frame_size: settings.max_frame_size,
        resource_read_timeout: Duration::from_secs(settings.resource_read_timeout_secs),
        token_path: settings.token_path,
    };
    let relay = Relay::start(config, keypair).await?;

    tokio::select! {
        _ = relay.wait_shutdown() => info!("Shutdown requested"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    relay.stop();
    Ok(())
}

/// The demo handler: answers SEND with the payload unchanged and declines
/// everything else.
struct EchoHandler;

impl CommandHandler for EchoHandler {
    fn handle(&self, code: u32, payload: &[u8]) -> std::result::Result<Bytes, HandlerError> {
        if code == CMD_SEND {
            Ok(Bytes::copy_from_slice(payload))
        } else {
            Err(HandlerError::Unsupported)
        }
    }
}

async fn run_resource(
    settings: ResourceSettings,
    name: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let keyfile = settings.keyfile.clone().unwrap_or_else(default_key_path);
    let keypair = load_or_generate_keypair(&keyfile)?;

    let config = ResourceConfig {
        relay_addr: settings.relay_addr,
        name: name.unwrap_or(settings.name),
        description: description.unwrap_or(settings.description),
        keepalive: Duration::from_secs(settings.keepalive_secs),
        retry_step: Duration::from_secs(settings.retry_step_secs),
        retry_total: Duration::from_secs(settings.retry_total_secs),
        max_frame_size: settings.max_frame_size,
    };
    let client = ResourceClient::connect(config, keypair, Arc::new(EchoHandler)).await?;
    println!("identity: {}", hex::encode(client.identity()));

    tokio::select! {
        _ = client.wait_done() => info!("Relay connection ended"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    client.stop();
    Ok(())
}

async fn list_resources(addr: String) -> Result<()> {
    let client = UserClient::connect(&addr, CONNECT_TIMEOUT, 1024 * 1024).await?;
    let records = client.list_resources().await?;
    if records.is_empty() {
        println!("no resources registered");
        return Ok(());
    }
    for record in records {
        println!(
            "{:>6}  {}  {:<20} {}",
            record.handle,
            hex::encode(record.identity),
            record.name,
            record.description
        );
    }
    Ok(())
}

fn parse_identity(hex_str: &str) -> Result<Identity> {
    let raw = hex::decode(hex_str).context("identity is not valid hex")?;
    let identity: Identity = raw
        .try_into()
        .map_err(|_| anyhow::anyhow!("identity must be exactly 32 bytes"))?;
    Ok(identity)
}

async fn send(addr: String, identity: &str, payload: &str) -> Result<()> {
    let identity = parse_identity(identity)?;
    let client = UserClient::connect(&addr, CONNECT_TIMEOUT, 1024 * 1024).await?;

    let reply = client.send_to(&identity, payload.as_bytes()).await?;
    println!(
        "resource {} ({}) replied: {}",
        reply.resource,
        fingerprint(&identity),
        String::from_utf8_lossy(&reply.data)
    );
    Ok(())
}

async fn shutdown(addr: String, token_file: &PathBuf) -> Result<()> {
    let token = std::fs::read(token_file)
        .with_context(|| format!("cannot read token file {token_file:?}"))?;
    if token.len() != portway_relay::TOKEN_LEN {
        bail!(
            "token file {token_file:?} holds {} bytes, expected {}",
            token.len(),
            portway_relay::TOKEN_LEN
        );
    }

    let client = UserClient::connect(&addr, CONNECT_TIMEOUT, 1024 * 1024).await?;
    client.execute_token(&token).await?;
    println!("shutdown token delivered to {addr}");
    Ok(())
}
