//! Structured payloads carried inside command/response frames
//!
//! The relay never inspects a forwarded application payload; the structures
//! here are the small amount of framing it does understand: the envelope that
//! lets a reply find its way back across the relay hop, and the resource
//! record returned by the lookup commands.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::Identity;

/// Maximum resource name length in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Maximum resource description length in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 256;

fn take(buf: &mut Bytes, n: usize, what: &'static str) -> Result<Bytes, WireError> {
    if buf.len() < n {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.split_to(n))
}

fn take_u32(buf: &mut Bytes, what: &'static str) -> Result<u32, WireError> {
    if buf.len() < 4 {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.get_u32())
}

fn take_array<const N: usize>(buf: &mut Bytes, what: &'static str) -> Result<[u8; N], WireError> {
    let bytes = take(buf, N, what)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn take_string(
    buf: &mut Bytes,
    field: &'static str,
    max: usize,
) -> Result<String, WireError> {
    let len = take_u32(buf, field)? as usize;
    if len > max {
        return Err(WireError::FieldTooLong { field, len, max });
    }
    let raw = take(buf, len, field)?;
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8(field))
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// The payload wrapper that survives the relay hop.
///
/// The relay allocates its own index on the resource link, so the user's
/// original `(index, handle)` pair travels inside the payload instead of the
/// envelope header. The resource echoes the wrapper back unchanged around its
/// reply, which is all the relay needs to route the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardEnvelope {
    /// Session handle of the originating user.
    pub user_handle: u32,
    /// The index the user put on its own command.
    pub user_index: u32,
    /// The application payload; opaque to the relay.
    pub payload: Bytes,
}

impl ForwardEnvelope {
    pub const HEADER_LEN: usize = 8;

    pub fn new(user_handle: u32, user_index: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            user_handle,
            user_index,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.payload.len());
        buf.put_u32(self.user_handle);
        buf.put_u32(self.user_index);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Self, WireError> {
        let user_handle = take_u32(&mut data, "envelope")?;
        let user_index = take_u32(&mut data, "envelope")?;
        Ok(Self {
            user_handle,
            user_index,
            payload: data,
        })
    }
}

/// A registered resource as reported to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Live session handle, valid until the resource disconnects.
    pub handle: u32,
    /// The Ed25519 public key the resource proved during its handshake.
    pub identity: Identity,
    pub name: String,
    pub description: String,
}

impl ResourceRecord {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.handle);
        buf.put_slice(&self.identity);
        put_string(buf, &self.name);
        put_string(buf, &self.description);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn decode_from(buf: &mut Bytes) -> Result<Self, WireError> {
        let handle = take_u32(buf, "resource record")?;
        let identity = take_array::<32>(buf, "resource record")?;
        let name = take_string(buf, "name", MAX_NAME_LEN)?;
        let description = take_string(buf, "description", MAX_DESCRIPTION_LEN)?;
        Ok(Self {
            handle,
            identity,
            name,
            description,
        })
    }

    pub fn decode(mut data: Bytes) -> Result<Self, WireError> {
        let record = Self::decode_from(&mut data)?;
        if !data.is_empty() {
            return Err(WireError::TrailingBytes {
                payload: "resource record",
                extra: data.len(),
            });
        }
        Ok(record)
    }

    /// Encode a LIST_RESOURCES reply: count-prefixed record sequence.
    pub fn encode_list(records: &[ResourceRecord]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(records.len() as u32);
        for record in records {
            record.encode_into(&mut buf);
        }
        buf.freeze()
    }

    /// Decode a LIST_RESOURCES reply.
    pub fn decode_list(mut data: Bytes) -> Result<Vec<ResourceRecord>, WireError> {
        let count = take_u32(&mut data, "resource list")?;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(Self::decode_from(&mut data)?);
        }
        if !data.is_empty() {
            return Err(WireError::TrailingBytes {
                payload: "resource list",
                extra: data.len(),
            });
        }
        Ok(records)
    }
}
