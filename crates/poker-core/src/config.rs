//! Session timing configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for one joined session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Snapshot acquisition timings
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Give up waiting for a host after this long (default: 10s)
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,
}

/// Timings for acquiring the first snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// When to retransmit `request-state`, measured from join (default: 200ms, 1.2s)
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,

    /// Self-initialize if still empty after this long (default: 2s).
    /// `null` means wait for a host indefinitely.
    #[serde(default = "default_fallback_after")]
    pub fallback_after_ms: Option<u64>,

    /// Self-initialization delay for the session creator (default: immediate)
    #[serde(default)]
    pub creator_fallback_after_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            retry_delays_ms: default_retry_delays(),
            fallback_after_ms: default_fallback_after(),
            creator_fallback_after_ms: 0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapConfig::default(),
            join_timeout_ms: default_join_timeout(),
        }
    }
}

fn default_retry_delays() -> Vec<u64> {
    vec![200, 1200]
}

fn default_fallback_after() -> Option<u64> {
    Some(2000)
}

fn default_join_timeout() -> u64 {
    10_000
}

impl SessionConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        tracing::info!("Loaded session configuration from {:?}", path);
        Ok(config)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
