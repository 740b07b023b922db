use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid key file {0}: expected 64 hex characters")]
    InvalidKeyFile(PathBuf),

    #[error("Failed to read key file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write key file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Ed25519 keypair identifying a relay or resource.
pub struct SigningKeypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Clone for SigningKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
            verifying_key: self.verifying_key,
        }
    }
}

impl SigningKeypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get the public key as bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Get the secret key as bytes
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Create from raw secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Sign arbitrary data
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_bytes()
    }
}

/// Verify a detached signature against a raw public key.
pub fn verify_signature(pubkey: &[u8; 32], data: &[u8], signature: &[u8; 64]) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(pubkey) {
        Ok(vk) => vk,
        Err(_) => return false,
    };

    let signature = Signature::from_bytes(signature);

    verifying_key.verify(data, &signature).is_ok()
}

/// Short SHA-256 fingerprint of a public key, for logs and listings.
pub fn fingerprint(pubkey: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pubkey);
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Default keypair location under the user's home directory.
pub fn default_key_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".portway").join("identity.key")
}

/// Load a keypair from `path`, generating and persisting a fresh one when the
/// file does not exist. The file holds the hex-encoded 32-byte secret.
pub fn load_or_generate_keypair(path: &Path) -> Result<SigningKeypair, KeyError> {
    if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| KeyError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let raw = hex::decode(content.trim())
            .map_err(|_| KeyError::InvalidKeyFile(path.to_path_buf()))?;
        let secret: [u8; 32] = raw
            .try_into()
            .map_err(|_| KeyError::InvalidKeyFile(path.to_path_buf()))?;
        Ok(SigningKeypair::from_secret_bytes(&secret))
    } else {
        let keypair = SigningKeypair::generate();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| KeyError::WriteFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
        std::fs::write(path, hex::encode(keypair.secret_key_bytes())).map_err(|source| {
            KeyError::WriteFailed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!("Generated new identity keypair at {:?}", path);
        Ok(keypair)
    }
}
