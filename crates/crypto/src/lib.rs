//! Portway crypto
//!
//! Ed25519 identity keypairs, the keypair file store, and the mutual
//! challenge/response handshake run between the relay and every resource
//! before registry admission.

mod handshake;
mod keys;

pub use handshake::{
    generate_nonce, sign_transcript, transcript, verify_transcript, Attestation, Challenge, Nonce,
    RelayProof, NONCE_LEN, SIGNATURE_LEN,
};
pub use keys::{
    default_key_path, fingerprint, load_or_generate_keypair, verify_signature, KeyError,
    SigningKeypair,
};
