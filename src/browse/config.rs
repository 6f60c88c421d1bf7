//! Browse session configuration
//!
//! Tunables for retries, recovery, the circuit breaker and keepalive.
//! Config location: ~/.ssh-browse/browse.json (missing file means defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Per-session resilience settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseConfig {
    /// Path the session starts at
    #[serde(default = "default_initial_path")]
    pub initial_path: String,

    /// Delays before the immediate retries of a foreground list (ms)
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Background recovery schedule (ms)
    #[serde(default = "default_recovery_delays_ms")]
    pub recovery_delays_ms: Vec<u64>,

    /// Consecutive failures that open the breaker
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// How long an open breaker refuses traffic (seconds)
    #[serde(default = "default_breaker_window_secs")]
    pub breaker_window_secs: u64,

    /// Keepalive ping interval (seconds)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    #[serde(default = "default_true")]
    pub keepalive_enabled: bool,
}

fn default_initial_path() -> String {
    "/".to_string()
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![300, 800]
}

fn default_recovery_delays_ms() -> Vec<u64> {
    vec![200, 800, 2000, 5000]
}

fn default_breaker_threshold() -> u32 {
    8
}

fn default_breaker_window_secs() -> u64 {
    30
}

fn default_keepalive_interval_secs() -> u64 {
    12
}

fn default_true() -> bool {
    true
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            initial_path: default_initial_path(),
            retry_delays_ms: default_retry_delays_ms(),
            recovery_delays_ms: default_recovery_delays_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_window_secs: default_breaker_window_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            keepalive_enabled: true,
        }
    }
}

impl BrowseConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path).await {
            Ok(contents) => {
                let config: BrowseConfig = serde_json::from_str(&contents)?;
                config.validate()?;
                info!("Loaded browse config from {:?}", path);
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No browse config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Load from the default location
    pub async fn load_default() -> Result<Self, ConfigError> {
        Self::load(&config_file()?).await
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker_threshold must be at least 1".to_string(),
            ));
        }
        if self.keepalive_enabled && self.keepalive_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }

    pub fn recovery_delays(&self) -> Vec<Duration> {
        self.recovery_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }

    pub fn breaker_window(&self) -> Duration {
        Duration::from_secs(self.breaker_window_secs)
    }

    /// `None` when keepalive is disabled
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_enabled
            .then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// One initial try plus one per retry delay
    pub fn max_attempts(&self) -> usize {
        self.retry_delays_ms.len() + 1
    }
}

/// ~/.ssh-browse
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".ssh-browse"))
        .ok_or(ConfigError::NoConfigDir)
}

pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("browse.json"))
}
