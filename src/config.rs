//! Bridge configuration
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file) is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host the plugin-facing HTTP server binds to
    pub host: String,
    pub port: u16,
    /// How long a submitted call may wait for the worker
    pub request_timeout_ms: u64,
    /// Maximum gap since the last channel activity before polling is refused
    pub staleness_window_ms: u64,
    /// Cadence of the expired-request sweep
    pub sweep_interval_ms: u64,
    /// Cadence at which a live stdio channel refreshes its activity
    pub keepalive_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3002,
            request_timeout_ms: 120_000,
            staleness_window_ms: 15_000,
            sweep_interval_ms: 5_000,
            keepalive_interval_ms: 5_000,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("staleness_window_ms", self.staleness_window_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("keepalive_interval_ms", self.keepalive_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.keepalive_interval_ms >= self.staleness_window_ms {
            return Err(ConfigError::Invalid(
                "keepalive_interval_ms must be shorter than staleness_window_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.staleness_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
