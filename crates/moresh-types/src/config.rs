//! Configuration loading from `~/.moresh/config.toml` with defaults.
//!
//! A missing, unreadable or invalid file never aborts startup: the problem is
//! logged and the defaults are used instead.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default relay port.
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Default maximum inbound relay frame size (1 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoreshConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Relay server settings.
    pub relay: RelayConfig,
    /// Client settings.
    pub client: ClientConfig,
}

impl Default for MoreshConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            relay: RelayConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

/// Relay server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_RELAY_PORT)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the relay.
    pub relay_url: String,
    /// Host the direct-channel listener binds to when initiating.
    pub bind_host: String,
    /// Host advertised to the peer in the direct-channel offer.
    pub advertise_host: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("ws://127.0.0.1:{DEFAULT_RELAY_PORT}"),
            bind_host: "0.0.0.0".to_string(),
            advertise_host: "127.0.0.1".to_string(),
        }
    }
}

/// Load configuration from a TOML file, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> MoreshConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return MoreshConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            return MoreshConfig::default();
        }
    };

    match toml::from_str::<MoreshConfig>(&contents) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to parse config, using defaults"
            );
            MoreshConfig::default()
        }
    }
}

/// Get the default Moresh home directory.
pub fn moresh_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".moresh")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    moresh_home().join("config.toml")
}
