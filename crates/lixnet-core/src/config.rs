//! Configuration system for lixnet.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LIXNET_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/lixnet/config.toml
//!   3. ~/.config/lixnet/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LixnetConfig {
    pub protocol: ProtocolConfig,
    pub abandon: AbandonConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest wire message the transport tolerates, in bytes. 0 = unbounded
    /// (chunking disabled).
    pub transmission_limit: usize,
    /// Most chunks a single transmission may use, in either direction.
    pub transmission_chunks_limit: usize,
}

/// How long unfinished transmissions are kept, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbandonConfig {
    /// Delay between an announcement and the first check.
    pub initial_delay_secs: u64,
    /// Delay between subsequent checks.
    pub check_interval_secs: u64,
    /// A transmission whose newest chunk is older than this is stalled.
    pub stall_timeout_secs: u64,
    /// Evict when the projected time to completion exceeds this.
    pub max_completion_estimate_secs: u64,
    /// An outbound transmission with no launch signal after this long is
    /// dropped, along with the caller's pending reply.
    pub launch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port for the daemon's HTTP endpoints (RPC and WebSocket).
    pub api_port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            transmission_limit: 0,
            transmission_chunks_limit: 20,
        }
    }
}

impl Default for AbandonConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 30,
            check_interval_secs: 10,
            stall_timeout_secs: 30,
            max_completion_estimate_secs: 300,
            launch_timeout_secs: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { api_port: 9101 }
    }
}

impl ProtocolConfig {
    /// The transmission limit as the peer consumes it: `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        (self.transmission_limit > 0).then_some(self.transmission_limit)
    }
}

impl AbandonConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn max_completion_estimate(&self) -> Duration {
        Duration::from_secs(self.max_completion_estimate_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("lixnet")
}

fn home_dir() -> PathBuf {
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

impl LixnetConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            LixnetConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file without applying env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LIXNET_CONFIG")
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
            let text = toml::to_string_pretty(&LixnetConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply LIXNET_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("LIXNET_PROTOCOL__TRANSMISSION_LIMIT") {
            if let Ok(n) = v.parse() {
                self.protocol.transmission_limit = n;
            }
        }
        if let Some(v) = lookup("LIXNET_PROTOCOL__TRANSMISSION_CHUNKS_LIMIT") {
            if let Ok(n) = v.parse() {
                self.protocol.transmission_chunks_limit = n;
            }
        }
        let abandon = [
            ("LIXNET_ABANDON__INITIAL_DELAY_SECS", &mut self.abandon.initial_delay_secs),
            ("LIXNET_ABANDON__CHECK_INTERVAL_SECS", &mut self.abandon.check_interval_secs),
            ("LIXNET_ABANDON__STALL_TIMEOUT_SECS", &mut self.abandon.stall_timeout_secs),
            (
                "LIXNET_ABANDON__MAX_COMPLETION_ESTIMATE_SECS",
                &mut self.abandon.max_completion_estimate_secs,
            ),
            ("LIXNET_ABANDON__LAUNCH_TIMEOUT_SECS", &mut self.abandon.launch_timeout_secs),
        ];
        for (key, field) in abandon {
            if let Some(n) = lookup(key).and_then(|v| v.parse().ok()) {
                *field = n;
            }
        }
        if let Some(v) = lookup("LIXNET_SERVER__API_PORT") {
            if let Ok(p) = v.parse() {
                self.server.api_port = p;
            }
        }
    }
}
