//! Resumable frame reading
//!
//! Accumulates socket reads into a buffer and carves complete frames off the
//! front. A frame spanning several reads just waits for more bytes; a clean
//! close between frames yields `None`, a close mid-frame is an error.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use portway_core::{Command, Response};

use crate::error::{NetError, Result};

const READ_CHUNK: usize = 8 * 1024;

/// One half of a connection: the read side plus its accumulation buffer.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next command frame. `Ok(None)` means the peer closed cleanly.
    pub async fn read_command(&mut self, max_data: usize) -> Result<Option<Command>> {
        loop {
            if let Some(cmd) = Command::decode(&mut self.buf, max_data)? {
                return Ok(Some(cmd));
            }
            if self.fill().await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(NetError::UnexpectedEof)
                };
            }
        }
    }

    /// Read the next response frame. `Ok(None)` means the peer closed cleanly.
    pub async fn read_response(&mut self, max_data: usize) -> Result<Option<Response>> {
        loop {
            if let Some(resp) = Response::decode(&mut self.buf, max_data)? {
                return Ok(Some(resp));
            }
            if self.fill().await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(NetError::UnexpectedEof)
                };
            }
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        Ok(self.inner.read_buf(&mut self.buf).await?)
    }
}
