//! File-backed configuration for the terminal client
//!
//! One `config.toml` under the OS config directory, loaded with CLI-flag
//! overrides layered on top. No env-var or multi-source layering: this
//! client's config surface is a handful of fields, not worth a dedicated
//! layering crate for.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

/// Persisted + runtime-overridable settings for one local device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Display name advertised to peers; a random 2-char device-id suffix is
    /// appended by `ble-link-core` itself.
    pub display_name: String,
    /// Auto-accept inbound connection requests instead of prompting.
    #[serde(default = "default_auto_accept")]
    pub auto_accept: bool,
    /// Handshake timeout, in seconds.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Sub-message ack timeout, in seconds.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Reconnection window, in seconds.
    #[serde(default = "default_reconnection_timeout_secs")]
    pub reconnection_timeout_secs: u64,
}

fn default_auto_accept() -> bool {
    true
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_ack_timeout_secs() -> u64 {
    1
}

fn default_reconnection_timeout_secs() -> u64 {
    30
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            display_name: "Anon".to_string(),
            auto_accept: default_auto_accept(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            reconnection_timeout_secs: default_reconnection_timeout_secs(),
        }
    }
}

impl CliConfig {
    /// Load from `path` if it exists, falling back to defaults otherwise.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = toml::to_string_pretty(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// `~/.config/ble-link/config.toml` (or the platform equivalent).
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| CliError::Config("no config directory for this platform".to_string()))?;
        Ok(dir.join("ble-link").join("config.toml"))
    }

    pub fn to_core_config(&self) -> ble_link_core::Config {
        ble_link_core::Config::new()
            .with_handshake_timeout(std::time::Duration::from_secs(self.handshake_timeout_secs))
            .with_ack_timeout(std::time::Duration::from_secs(self.ack_timeout_secs))
            .with_reconnection_timeout(std::time::Duration::from_secs(self.reconnection_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = CliConfig::load_from_file(Path::new("/nonexistent/ble-link/config.toml")).unwrap();
        assert_eq!(config.display_name, "Anon");
        assert!(config.auto_accept);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = std::env::temp_dir().join("ble-link-cli-test-config");
        let path = dir.join("config.toml");
        let config = CliConfig {
            display_name: "Rosa".to_string(),
            ..CliConfig::default()
        };
        config.save_to_file(&path).unwrap();
        let loaded = CliConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.display_name, "Rosa");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
