//! Mutual relay ↔ resource authentication
//!
//! Run once per resource connection before the relay admits the resource to
//! its registry:
//!
//! 1. relay → WHO_ARE_YOU command carrying a [`Challenge`]
//! 2. resource → response carrying an [`Attestation`] (identity, metadata,
//!    signature over the shared transcript)
//! 3. relay → RELAY_SIGN command carrying a [`RelayProof`] over the same
//!    transcript, so the resource can authenticate the relay too
//!
//! The transcript is `relayPubkey ‖ relayNonce ‖ resourcePubkey ‖
//! resourceNonce` (96 bytes); both signatures cover it in full, binding each
//! side's key to both fresh nonces.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;

use portway_core::{WireError, MAX_DESCRIPTION_LEN, MAX_NAME_LEN};

use crate::keys::{verify_signature, SigningKeypair};

/// Length of the per-connection random nonce.
pub const NONCE_LEN: usize = 16;

/// Length of an Ed25519 detached signature.
pub const SIGNATURE_LEN: usize = 64;

pub type Nonce = [u8; NONCE_LEN];

/// Generate a fresh handshake nonce.
pub fn generate_nonce() -> Nonce {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Build the 96-byte transcript both sides sign.
pub fn transcript(
    relay_pubkey: &[u8; 32],
    relay_nonce: &Nonce,
    resource_pubkey: &[u8; 32],
    resource_nonce: &Nonce,
) -> [u8; 96] {
    let mut out = [0u8; 96];
    out[..32].copy_from_slice(relay_pubkey);
    out[32..48].copy_from_slice(relay_nonce);
    out[48..80].copy_from_slice(resource_pubkey);
    out[80..96].copy_from_slice(resource_nonce);
    out
}

/// Sign the handshake transcript.
pub fn sign_transcript(
    keypair: &SigningKeypair,
    relay_pubkey: &[u8; 32],
    relay_nonce: &Nonce,
    resource_pubkey: &[u8; 32],
    resource_nonce: &Nonce,
) -> [u8; SIGNATURE_LEN] {
    keypair.sign(&transcript(
        relay_pubkey,
        relay_nonce,
        resource_pubkey,
        resource_nonce,
    ))
}

/// Verify a transcript signature against the claimed signer key.
pub fn verify_transcript(
    signer_pubkey: &[u8; 32],
    relay_pubkey: &[u8; 32],
    relay_nonce: &Nonce,
    resource_pubkey: &[u8; 32],
    resource_nonce: &Nonce,
    signature: &[u8; SIGNATURE_LEN],
) -> bool {
    verify_signature(
        signer_pubkey,
        &transcript(relay_pubkey, relay_nonce, resource_pubkey, resource_nonce),
        signature,
    )
}

fn take_array<const N: usize>(buf: &mut Bytes, what: &'static str) -> Result<[u8; N], WireError> {
    if buf.len() < N {
        return Err(WireError::Truncated(what));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&buf.split_to(N));
    Ok(out)
}

fn take_string(buf: &mut Bytes, field: &'static str, max: usize) -> Result<String, WireError> {
    if buf.len() < 4 {
        return Err(WireError::Truncated(field));
    }
    let len = buf.get_u32() as usize;
    if len > max {
        return Err(WireError::FieldTooLong { field, len, max });
    }
    if buf.len() < len {
        return Err(WireError::Truncated(field));
    }
    String::from_utf8(buf.split_to(len).to_vec()).map_err(|_| WireError::InvalidUtf8(field))
}

fn reject_trailing(buf: &Bytes, payload: &'static str) -> Result<(), WireError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(WireError::TrailingBytes {
            payload,
            extra: buf.len(),
        })
    }
}

/// WHO_ARE_YOU command payload: the relay's identity and fresh nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub relay_pubkey: [u8; 32],
    pub relay_nonce: Nonce,
}

impl Challenge {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32 + NONCE_LEN);
        buf.put_slice(&self.relay_pubkey);
        buf.put_slice(&self.relay_nonce);
        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Self, WireError> {
        let relay_pubkey = take_array::<32>(&mut data, "challenge")?;
        let relay_nonce = take_array::<NONCE_LEN>(&mut data, "challenge")?;
        reject_trailing(&data, "challenge")?;
        Ok(Self {
            relay_pubkey,
            relay_nonce,
        })
    }
}

/// WHO_ARE_YOU response payload: the resource's identity, metadata, nonce,
/// and signature over the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub resource_pubkey: [u8; 32],
    pub resource_nonce: Nonce,
    pub name: String,
    pub description: String,
    pub signature: [u8; SIGNATURE_LEN],
}

impl Attestation {
    /// Build and sign an attestation answering `challenge`.
    pub fn create(
        keypair: &SigningKeypair,
        challenge: &Challenge,
        resource_nonce: Nonce,
        name: String,
        description: String,
    ) -> Self {
        let resource_pubkey = keypair.public_key_bytes();
        let signature = sign_transcript(
            keypair,
            &challenge.relay_pubkey,
            &challenge.relay_nonce,
            &resource_pubkey,
            &resource_nonce,
        );
        Self {
            resource_pubkey,
            resource_nonce,
            name,
            description,
            signature,
        }
    }

    /// Check the attestation's signature against the claimed resource key.
    pub fn verify(&self, challenge: &Challenge) -> bool {
        verify_transcript(
            &self.resource_pubkey,
            &challenge.relay_pubkey,
            &challenge.relay_nonce,
            &self.resource_pubkey,
            &self.resource_nonce,
            &self.signature,
        )
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(&self.resource_pubkey);
        buf.put_slice(&self.resource_nonce);
        buf.put_u32(self.name.len() as u32);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32(self.description.len() as u32);
        buf.put_slice(self.description.as_bytes());
        buf.put_slice(&self.signature);
        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Self, WireError> {
        let resource_pubkey = take_array::<32>(&mut data, "attestation")?;
        let resource_nonce = take_array::<NONCE_LEN>(&mut data, "attestation")?;
        let name = take_string(&mut data, "name", MAX_NAME_LEN)?;
        let description = take_string(&mut data, "description", MAX_DESCRIPTION_LEN)?;
        let signature = take_array::<SIGNATURE_LEN>(&mut data, "attestation")?;
        reject_trailing(&data, "attestation")?;
        Ok(Self {
            resource_pubkey,
            resource_nonce,
            name,
            description,
            signature,
        })
    }
}

/// RELAY_SIGN command payload: the relay's signature over the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayProof {
    pub signature: [u8; SIGNATURE_LEN],
}

impl RelayProof {
    /// Sign the completed transcript on the relay side.
    pub fn create(
        keypair: &SigningKeypair,
        relay_nonce: &Nonce,
        attestation: &Attestation,
    ) -> Self {
        let signature = sign_transcript(
            keypair,
            &keypair.public_key_bytes(),
            relay_nonce,
            &attestation.resource_pubkey,
            &attestation.resource_nonce,
        );
        Self { signature }
    }

    /// Resource-side check that the relay really holds the key it announced
    /// in the challenge.
    pub fn verify(
        &self,
        challenge: &Challenge,
        resource_pubkey: &[u8; 32],
        resource_nonce: &Nonce,
    ) -> bool {
        verify_transcript(
            &challenge.relay_pubkey,
            &challenge.relay_pubkey,
            &challenge.relay_nonce,
            resource_pubkey,
            resource_nonce,
            &self.signature,
        )
    }

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.signature)
    }

    pub fn decode(mut data: Bytes) -> Result<Self, WireError> {
        let signature = take_array::<SIGNATURE_LEN>(&mut data, "relay proof")?;
        reject_trailing(&data, "relay proof")?;
        Ok(Self { signature })
    }
}
