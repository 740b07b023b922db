//! Queued per-peer writing
//!
//! Every connection gets one writer task owning the write half and draining a
//! bounded queue. Any task may enqueue frames; when the queue is full the
//! sender waits, so a slow peer cannot grow memory beyond its own queue. A
//! write failure ends the task, after which `is_closed` reports true and
//! further sends fail — the signal the relay's binding caches self-heal on.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{NetError, Result};

/// Cloneable handle for enqueuing frames to one peer.
#[derive(Clone)]
pub struct PeerWriter {
    tx: mpsc::Sender<Bytes>,
}

impl PeerWriter {
    /// Enqueue a frame, waiting if the peer's queue is full.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| NetError::PeerGone)
    }

    /// Enqueue a frame without waiting.
    ///
    /// `QueueFull` means the peer has stopped draining its queue; callers on
    /// shared paths use this instead of [`send`](Self::send) so one slow peer
    /// cannot block delivery to anyone else.
    pub fn try_send(&self, frame: Bytes) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NetError::PeerGone,
        })
    }

    /// True once the writer task has terminated (socket error or close).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task for a connection's write half.
///
/// The task ends when every [`PeerWriter`] clone is dropped or a write fails;
/// dropping the write half closes the socket's send direction.
pub fn spawn_writer<W>(mut write_half: W, depth: usize) -> (PeerWriter, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(depth);

    let handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                debug!("Peer write failed: {}", e);
                break;
            }
        }
        rx.close();
        let _ = write_half.shutdown().await;
    });

    (PeerWriter { tx }, handle)
}
