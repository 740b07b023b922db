//! The forward client
//!
//! One background task reads responses off the socket and completes the
//! pending call registered under the response's index. Replies to forwarded
//! sends come back whenever the resource answers, so out-of-order completion
//! is the normal case, not an edge case.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use portway_core::codes::{
    CMD_ENUM_COMMANDS, CMD_EXECUTE_TOKEN, CMD_GET_RESOURCE_INFO, CMD_INIT_SM,
    CMD_IS_RESOURCE_PRESENT, CMD_LIST_RESOURCES, CMD_SEND, CMD_SEND_ENCRYPTED, CMD_SEND_TO,
};
use portway_core::{Command, Identity, ResourceRecord, Response, WireError};
use portway_net::{connect, spawn_writer, FrameReader, PeerWriter, DEFAULT_WRITE_QUEUE_DEPTH};

use crate::{ClientError, Result};

type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Response>>>>;

/// The reply to a forwarded send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReply {
    /// Session handle of the resource that answered.
    pub resource: u32,
    /// The application payload it replied with.
    pub data: Bytes,
}

/// A connection to a relay's user port.
pub struct UserClient {
    writer: PeerWriter,
    pending: PendingMap,
    next_index: AtomicU32,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UserClient {
    /// Dial the relay once; users do not retry-loop the way resources do.
    pub async fn connect(addr: &str, timeout: Duration, max_frame_size: usize) -> Result<Self> {
        let stream = connect(addr, timeout).await?;
        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer(write_half, DEFAULT_WRITE_QUEUE_DEPTH);
        let reader = FrameReader::new(read_half);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let demux_task = tokio::spawn(demux(reader, Arc::clone(&pending), max_frame_size));

        Ok(Self {
            writer,
            pending,
            next_index: AtomicU32::new(0),
            tasks: Mutex::new(vec![demux_task, writer_task]),
        })
    }

    /// List the command codes the relay supports.
    pub async fn enum_commands(&self) -> Result<Vec<u32>> {
        let resp = self.call(CMD_ENUM_COMMANDS, Bytes::new()).await?;
        let mut data = resp.data;
        if data.len() % 4 != 0 {
            return Err(WireError::Truncated("command list").into());
        }
        let mut codes = Vec::with_capacity(data.len() / 4);
        while !data.is_empty() {
            codes.push(data.get_u32());
        }
        Ok(codes)
    }

    /// List every registered resource.
    pub async fn list_resources(&self) -> Result<Vec<ResourceRecord>> {
        let resp = self.call(CMD_LIST_RESOURCES, Bytes::new()).await?;
        Ok(ResourceRecord::decode_list(resp.data)?)
    }

    /// Resolve an identity to its live session handle.
    pub async fn resolve(&self, identity: &Identity) -> Result<u32> {
        let resp = self
            .call(CMD_IS_RESOURCE_PRESENT, Bytes::copy_from_slice(identity))
            .await?;
        let mut data = resp.data;
        if data.len() < 4 {
            return Err(WireError::Truncated("resource handle").into());
        }
        Ok(data.get_u32())
    }

    /// Fetch the full record for an identity.
    pub async fn resource_info(&self, identity: &Identity) -> Result<ResourceRecord> {
        let resp = self
            .call(CMD_GET_RESOURCE_INFO, Bytes::copy_from_slice(identity))
            .await?;
        Ok(ResourceRecord::decode(resp.data)?)
    }

    /// Send a payload to a resource by handle and await its reply.
    pub async fn send(&self, handle: u32, payload: &[u8]) -> Result<SendReply> {
        self.forward(CMD_SEND, handle_framed(handle, payload)).await
    }

    /// Send a payload to a resource by identity and await its reply.
    pub async fn send_to(&self, identity: &Identity, payload: &[u8]) -> Result<SendReply> {
        let mut data = BytesMut::with_capacity(32 + payload.len());
        data.put_slice(identity);
        data.put_slice(payload);
        self.forward(CMD_SEND_TO, data.freeze()).await
    }

    /// Pass an opaque cryptogram to a resource by handle.
    pub async fn send_encrypted(&self, handle: u32, cryptogram: &[u8]) -> Result<SendReply> {
        self.forward(CMD_SEND_ENCRYPTED, handle_framed(handle, cryptogram))
            .await
    }

    /// Pass an opaque secure-messaging init blob to a resource by handle.
    pub async fn init_sm(&self, handle: u32, blob: &[u8]) -> Result<SendReply> {
        self.forward(CMD_INIT_SM, handle_framed(handle, blob)).await
    }

    /// Present a shutdown token. The relay answers OK whether or not the
    /// token matched; stopping is observable only by the connection dying.
    pub async fn execute_token(&self, token: &[u8]) -> Result<()> {
        self.call(CMD_EXECUTE_TOKEN, Bytes::copy_from_slice(token))
            .await?;
        Ok(())
    }

    /// Close the connection. Pending calls fail with `ConnectionLost`.
    pub fn close(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.pending.lock().unwrap().clear();
    }

    async fn forward(&self, code: u32, data: Bytes) -> Result<SendReply> {
        let resp = self.call(code, data).await?;
        let mut data = resp.data;
        if data.len() < 4 {
            return Err(WireError::Truncated("responding resource id").into());
        }
        let resource = data.get_u32();
        Ok(SendReply { resource, data })
    }

    async fn call(&self, code: u32, data: Bytes) -> Result<Response> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(index, tx);

        let frame = Command::new(index, code, data).encode();
        if self.writer.send(frame).await.is_err() {
            self.pending.lock().unwrap().remove(&index);
            return Err(ClientError::ConnectionLost);
        }

        let resp = rx.await.map_err(|_| ClientError::ConnectionLost)?;
        if !resp.is_ok() {
            return Err(ClientError::Status {
                command: code,
                status: resp.status,
            });
        }
        Ok(resp)
    }
}

impl Drop for UserClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn handle_framed(handle: u32, payload: &[u8]) -> Bytes {
    let mut data = BytesMut::with_capacity(4 + payload.len());
    data.put_u32(handle);
    data.put_slice(payload);
    data.freeze()
}

async fn demux(
    mut reader: FrameReader<tokio::net::tcp::OwnedReadHalf>,
    pending: PendingMap,
    max_frame_size: usize,
) {
    loop {
        match reader.read_response(max_frame_size).await {
            Ok(Some(resp)) => {
                let waiter = pending.lock().unwrap().remove(&resp.index);
                match waiter {
                    // A dropped receiver just means the caller gave up.
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => debug!("Response for unknown index {}; dropped", resp.index),
                }
            }
            Ok(None) => {
                debug!("Relay closed the connection");
                break;
            }
            Err(e) => {
                warn!("User link read failed: {}", e);
                break;
            }
        }
    }
    // Dropping the senders fails every outstanding call.
    pending.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use portway_core::codes::{STATUS_OK, STATUS_RESOURCE_NOT_FOUND};
    use portway_core::response_code;
    use tokio::net::TcpListener;

    const MAX: usize = 1 << 20;

    /// Accept one client and run `script` over the raw frame streams.
    async fn fake_relay<F, Fut>(script: F) -> String
    where
        F: FnOnce(FrameReader<tokio::net::tcp::OwnedReadHalf>, PeerWriter) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let (writer, _task) = spawn_writer(write_half, 8);
            script(FrameReader::new(read_half), writer).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let addr = fake_relay(|mut reader, writer| async move {
            let a = reader.read_command(MAX).await.unwrap().unwrap();
            let b = reader.read_command(MAX).await.unwrap().unwrap();
            // Answer the second call first.
            writer.send(Response::ok(&b, &b"second"[..]).encode()).await.unwrap();
            writer.send(Response::ok(&a, &b"first"[..]).encode()).await.unwrap();
        })
        .await;

        let client = Arc::new(
            UserClient::connect(&addr, Duration::from_secs(1), MAX)
                .await
                .unwrap(),
        );
        let c = Arc::clone(&client);
        let first = tokio::spawn(async move { c.call(CMD_ENUM_COMMANDS, Bytes::new()).await });
        // Make sure the first command hits the wire first.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = client.call(CMD_LIST_RESOURCES, Bytes::new()).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(&first.data[..], b"first");
        assert_eq!(&second.data[..], b"second");
    }

    #[tokio::test]
    async fn test_error_status_is_typed() {
        let addr = fake_relay(|mut reader, writer| async move {
            let cmd = reader.read_command(MAX).await.unwrap().unwrap();
            writer
                .send(Response::error(&cmd, STATUS_RESOURCE_NOT_FOUND).encode())
                .await
                .unwrap();
        })
        .await;

        let client = UserClient::connect(&addr, Duration::from_secs(1), MAX)
            .await
            .unwrap();
        let err = client.resolve(&[9u8; 32]).await.unwrap_err();
        assert_eq!(err.status(), Some(STATUS_RESOURCE_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_send_reply_carries_resource_id() {
        let addr = fake_relay(|mut reader, writer| async move {
            let cmd = reader.read_command(MAX).await.unwrap().unwrap();
            assert_eq!(cmd.code, CMD_SEND);
            // `[handle:4][payload]` as the relay would have forwarded it.
            assert_eq!(&cmd.data[..4], &77u32.to_be_bytes());
            assert_eq!(&cmd.data[4..], b"ping");

            let mut reply = BytesMut::new();
            reply.put_u32(123);
            reply.put_slice(b"pong");
            writer
                .send(
                    Response::new(cmd.index, response_code(CMD_SEND), STATUS_OK, reply.freeze())
                        .encode(),
                )
                .await
                .unwrap();
        })
        .await;

        let client = UserClient::connect(&addr, Duration::from_secs(1), MAX)
            .await
            .unwrap();
        let reply = client.send(77, b"ping").await.unwrap();
        assert_eq!(reply.resource, 123);
        assert_eq!(&reply.data[..], b"pong");
    }

    #[tokio::test]
    async fn test_relay_close_fails_pending_call() {
        let addr = fake_relay(|mut reader, writer| async move {
            let _ = reader.read_command(MAX).await;
            drop(writer);
        })
        .await;

        let client = UserClient::connect(&addr, Duration::from_secs(1), MAX)
            .await
            .unwrap();
        let result = client.enum_commands().await;
        assert!(matches!(result, Err(ClientError::ConnectionLost)));
    }
}
