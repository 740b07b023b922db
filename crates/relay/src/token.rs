//! Shutdown token
//!
//! A random 32-byte secret written to a well-known file on startup. A client
//! that can read the file may stop the relay remotely with EXECUTE_TOKEN;
//! anything else presented there is silently ignored.

use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

pub const TOKEN_LEN: usize = 32;

pub struct ShutdownToken {
    value: [u8; TOKEN_LEN],
    path: PathBuf,
}

impl ShutdownToken {
    /// Generate a fresh token and persist it to `path`.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let mut value = [0u8; TOKEN_LEN];
        OsRng.fill_bytes(&mut value);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, value)?;
        info!("Shutdown token written to {:?}", path);

        Ok(Self {
            value,
            path: path.to_path_buf(),
        })
    }

    /// Byte-exact comparison against the presented value.
    pub fn matches(&self, presented: &[u8]) -> bool {
        presented.len() == TOKEN_LEN && presented == self.value
    }

    /// Delete the token file. Failure is logged, not escalated — the process
    /// is exiting either way.
    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Shutdown token removed"),
            Err(e) => debug!("Could not remove shutdown token {:?}: {}", self.path, e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn value(&self) -> &[u8; TOKEN_LEN] {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.token");

        let token = ShutdownToken::create(&path).unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk.len(), TOKEN_LEN);
        assert!(token.matches(&on_disk));
    }

    #[test]
    fn test_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let token = ShutdownToken::create(&dir.path().join("t")).unwrap();

        assert!(!token.matches(&[0u8; TOKEN_LEN]));
        assert!(!token.matches(&token.value()[..TOKEN_LEN - 1]));
        assert!(!token.matches(&[]));

        let mut flipped = *token.value();
        flipped[0] ^= 0x01;
        assert!(!token.matches(&flipped));
    }

    #[test]
    fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.token");
        let token = ShutdownToken::create(&path).unwrap();

        assert!(path.exists());
        token.remove();
        assert!(!path.exists());

        // Second removal is harmless.
        token.remove();
    }

    #[test]
    fn test_tokens_are_random() {
        let dir = tempfile::tempdir().unwrap();
        let a = ShutdownToken::create(&dir.path().join("a")).unwrap();
        let b = ShutdownToken::create(&dir.path().join("b")).unwrap();
        assert_ne!(a.value(), b.value());
    }
}
