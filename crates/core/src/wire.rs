//! Binary command/response framing
//!
//! Both links speak the same envelope, big-endian 32-bit fields:
//!
//! ```text
//! Command:  index(4) code(4) dataLen(4) data(dataLen)
//! Response: index(4) code(4) status(4) dataLen(4) data(dataLen)
//! ```
//!
//! Decoding is resumable: a partial header or body leaves the buffer
//! untouched and reports "need more bytes", so a frame spanning several
//! socket reads never blocks anything but the read itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// Command header: index, code, data length.
pub const COMMAND_HEADER_LEN: usize = 12;

/// Response header: index, code, status, data length.
pub const RESPONSE_HEADER_LEN: usize = 16;

/// Fixed additive offset between a command code and its response code.
pub const RESPONSE_CODE_OFFSET: u32 = 0x2000_0000;

/// Compute the response code for a command code.
pub fn response_code(command: u32) -> u32 {
    command.wrapping_add(RESPONSE_CODE_OFFSET)
}

/// Compute the command code a response code answers.
pub fn command_code(response: u32) -> u32 {
    response.wrapping_sub(RESPONSE_CODE_OFFSET)
}

/// A command frame: the unit flowing into a command-receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub index: u32,
    pub code: u32,
    pub data: Bytes,
}

impl Command {
    pub fn new(index: u32, code: u32, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            code,
            data: data.into(),
        }
    }

    /// Encode into a single wire frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(COMMAND_HEADER_LEN + self.data.len());
        buf.put_u32(self.index);
        buf.put_u32(self.code);
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Try to decode one command from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
    /// A declared data length above `max_data` is fatal to the connection.
    pub fn decode(buf: &mut BytesMut, max_data: usize) -> Result<Option<Self>, WireError> {
        if buf.len() < COMMAND_HEADER_LEN {
            return Ok(None);
        }
        let declared = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        if declared > max_data {
            return Err(WireError::FrameTooLarge {
                declared,
                max: max_data,
            });
        }
        if buf.len() < COMMAND_HEADER_LEN + declared {
            return Ok(None);
        }
        let index = buf.get_u32();
        let code = buf.get_u32();
        let _len = buf.get_u32();
        let data = buf.split_to(declared).freeze();
        Ok(Some(Self { index, code, data }))
    }
}

/// A response frame: the unit flowing out of a command-receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub index: u32,
    pub code: u32,
    pub status: u32,
    pub data: Bytes,
}

impl Response {
    pub fn new(index: u32, code: u32, status: u32, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            code,
            status,
            data: data.into(),
        }
    }

    /// A successful response answering `command`, with `data` as payload.
    pub fn ok(command: &Command, data: impl Into<Bytes>) -> Self {
        Self::new(command.index, response_code(command.code), crate::codes::STATUS_OK, data)
    }

    /// An error response answering `command`.
    pub fn error(command: &Command, status: u32) -> Self {
        Self::new(command.index, response_code(command.code), status, Bytes::new())
    }

    pub fn is_ok(&self) -> bool {
        self.status == crate::codes::STATUS_OK
    }

    /// Encode into a single wire frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + self.data.len());
        buf.put_u32(self.index);
        buf.put_u32(self.code);
        buf.put_u32(self.status);
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Try to decode one response from the front of `buf`.
    ///
    /// Same contract as [`Command::decode`].
    pub fn decode(buf: &mut BytesMut, max_data: usize) -> Result<Option<Self>, WireError> {
        if buf.len() < RESPONSE_HEADER_LEN {
            return Ok(None);
        }
        let declared = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]) as usize;
        if declared > max_data {
            return Err(WireError::FrameTooLarge {
                declared,
                max: max_data,
            });
        }
        if buf.len() < RESPONSE_HEADER_LEN + declared {
            return Ok(None);
        }
        let index = buf.get_u32();
        let code = buf.get_u32();
        let status = buf.get_u32();
        let _len = buf.get_u32();
        let data = buf.split_to(declared).freeze();
        Ok(Some(Self {
            index,
            code,
            status,
            data,
        }))
    }
}
