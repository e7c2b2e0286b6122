//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streetpass_grid::GridConfig;
use streetpass_session::{FallbackLocation, SessionConfig};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Presence backend connection.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Grid cell geometry.
    #[serde(default)]
    pub grid: GridConfig,
    /// Proximity session timing.
    #[serde(default)]
    pub session: SessionSection,
    /// Share links.
    #[serde(default)]
    pub share: ShareConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Presence backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay address. Empty = in-process backend, visible to this daemon only.
    #[serde(default = "default_relay_addr")]
    pub addr: String,
    /// Connect and per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Session timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Wait for the first location fix before using `fallback`.
    #[serde(default = "default_timeout_ms")]
    pub location_timeout_ms: u64,
    /// Wait for the first peer snapshot before showing an empty list.
    #[serde(default = "default_timeout_ms")]
    pub peer_load_timeout_ms: u64,
    #[serde(default)]
    pub fallback: FallbackLocation,
}

/// Share link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Base URL the `?user=` query is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Event bus buffer per subscriber.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

// Default value functions

fn default_relay_addr() -> String {
    "127.0.0.1:7420".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_base_url() -> String {
    "https://streetpass.app/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_buffer() -> usize {
    1000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: default_relay_addr(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            location_timeout_ms: default_timeout_ms(),
            peer_load_timeout_ms: default_timeout_ms(),
            fallback: FallbackLocation::default(),
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<DaemonConfig>(&content)?
        } else {
            Self::default()
        };
        config.grid.validate()?;
        Ok(config)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Tunables handed to the proximity session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            grid: self.grid,
            location_timeout: Duration::from_millis(self.session.location_timeout_ms),
            peer_load_timeout: Duration::from_millis(self.session.peer_load_timeout_ms),
            fallback: self.session.fallback.into(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.request_timeout_secs)
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("STREETPASS_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/StreetPass")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("StreetPass")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            dirs_fallback(".streetpass")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/streetpass"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.relay.addr, "127.0.0.1:7420");
        assert_eq!(config.grid.cell_size, 0.0001);
        assert_eq!(config.session.location_timeout_ms, 5_000);
        assert_eq!(config.session.fallback.latitude, 34.0522);
        assert_eq!(config.advanced.log_level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
    }

    #[test]
    fn test_partial_file() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [relay]
            addr = ""

            [session]
            location_timeout_ms = 250
            "#,
        )
        .expect("parse");
        assert!(config.relay.addr.is_empty());
        assert_eq!(config.relay.request_timeout_secs, 10);

        let session = config.session_config();
        assert_eq!(session.location_timeout, Duration::from_millis(250));
        assert_eq!(session.peer_load_timeout, Duration::from_millis(5_000));
        assert_eq!(session.fallback.longitude, -118.2437);
    }
}
