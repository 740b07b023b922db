//! Portway settings
//!
//! File-based configuration for the relay and the resource reverse client.

mod config;

use std::path::PathBuf;

use thiserror::Error;

pub use config::{RelaySettings, ResourceSettings, Settings};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to create settings directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Default settings location under the user's home directory.
pub fn default_settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".portway").join("settings.json")
}
