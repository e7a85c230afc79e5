//! Configuration for the usbcomm driver boundary.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $USBCOMM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/usbcomm/config.toml
//!   3. ~/.config/usbcomm/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbCommConfig {
    pub driver: DriverConfig,
    pub transfer: TransferConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Reported by GetDriverVersion. Truncated to the structure size.
    pub version: String,
    /// Number of records kept in the in-memory driver debug log.
    pub debug_log_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bound on one capability probe exchange.
    pub probe_timeout_ms: u64,
    /// Bound on one endpoint exchange during a write or a read poll.
    pub exchange_timeout_ms: u64,
    /// Bound on a whole Read, across all polls.
    pub read_timeout_ms: u64,
    /// Pause between interrupt polls that return nothing.
    pub poll_interval_ms: u64,
    /// Extra attempts at a write after a device timeout. 0 = no retry.
    pub write_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket the daemon accepts client connections on.
    pub socket_path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for UsbCommConfig {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            transfer: TransferConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            debug_log_capacity: 64,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1_000,
            exchange_timeout_ms: 1_000,
            read_timeout_ms: 5_000,
            poll_interval_ms: 10,
            write_retries: 2,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: runtime_dir().join("usbcomm.sock"),
        }
    }
}

impl TransferConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("usbcomm")
}

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl UsbCommConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            UsbCommConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("USBCOMM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&UsbCommConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply USBCOMM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("USBCOMM_TRANSFER__READ_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.transfer.read_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("USBCOMM_TRANSFER__PROBE_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.transfer.probe_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("USBCOMM_TRANSFER__WRITE_RETRIES") {
            if let Ok(n) = v.parse() {
                self.transfer.write_retries = n;
            }
        }
        if let Ok(v) = std::env::var("USBCOMM_DAEMON__SOCKET_PATH") {
            self.daemon.socket_path = PathBuf::from(v);
        }
    }
}
