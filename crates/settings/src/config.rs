//! Configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Relay process settings
    #[serde(default)]
    pub relay: RelaySettings,

    /// Resource reverse-client settings
    #[serde(default)]
    pub resource: ResourceSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay: RelaySettings::default(),
            resource: ResourceSettings::default(),
            config_path: None,
        }
    }
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.clone());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.clone());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// Relay process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Address to bind both listeners on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port resources dial into
    #[serde(default = "default_resource_port")]
    pub resource_port: u16,

    /// Port users dial into
    #[serde(default = "default_user_port")]
    pub user_port: u16,

    /// Worker threads for the runtime
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Per-session frame payload limit in bytes
    #[serde(default = "default_max_frame")]
    pub max_frame_size: usize,

    /// Read timeout for resource sockets, in seconds
    #[serde(default = "default_read_timeout")]
    pub resource_read_timeout_secs: u64,

    /// Mirror logs to a file
    #[serde(default)]
    pub log_to_file: bool,

    /// Log file location when `log_to_file` is set
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Where the shutdown token is written on startup
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// Relay identity keyfile
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_resource_port() -> u16 {
    9710
}

fn default_user_port() -> u16 {
    9711
}

fn default_worker_threads() -> usize {
    4
}

fn default_max_frame() -> usize {
    1024 * 1024
}

fn default_read_timeout() -> u64 {
    120
}

fn default_log_path() -> PathBuf {
    PathBuf::from("portway-relay.log")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("portway-relay.token")
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            resource_port: default_resource_port(),
            user_port: default_user_port(),
            worker_threads: default_worker_threads(),
            max_frame_size: default_max_frame(),
            resource_read_timeout_secs: default_read_timeout(),
            log_to_file: false,
            log_path: default_log_path(),
            token_path: default_token_path(),
            keyfile: None,
        }
    }
}

/// Resource reverse-client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSettings {
    /// Relay resource-port address to dial (host:port)
    #[serde(default = "default_relay_addr")]
    pub relay_addr: String,

    /// Resource display name, sent in the handshake
    #[serde(default = "default_name")]
    pub name: String,

    /// Resource description, sent in the handshake
    #[serde(default)]
    pub description: String,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Seconds between reconnect attempts (linear backoff step)
    #[serde(default = "default_retry_step")]
    pub retry_step_secs: u64,

    /// Total reconnect budget in seconds before giving up
    #[serde(default = "default_retry_total")]
    pub retry_total_secs: u64,

    /// Per-session frame payload limit in bytes
    #[serde(default = "default_max_frame")]
    pub max_frame_size: usize,

    /// Resource identity keyfile
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
}

fn default_relay_addr() -> String {
    "127.0.0.1:9710".to_string()
}

fn default_name() -> String {
    "resource".to_string()
}

fn default_keepalive() -> u64 {
    30
}

fn default_retry_step() -> u64 {
    2
}

fn default_retry_total() -> u64 {
    300
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            relay_addr: default_relay_addr(),
            name: default_name(),
            description: String::new(),
            keepalive_secs: default_keepalive(),
            retry_step_secs: default_retry_step(),
            retry_total_secs: default_retry_total(),
            max_frame_size: default_max_frame(),
            keyfile: None,
        }
    }
}
