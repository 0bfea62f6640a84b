//! Configuration types for the SOS content cache
//!
//! This module defines configuration structures used across components.
//! Every section falls back to its defaults, so a partial TOML file is
//! enough to override single values.

use crate::error::{Error, Result};
use crate::types::DEFAULT_EPSG_CODE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted interval between scheduled complete updates (one year)
pub const MAX_UPDATE_INTERVAL_MINS: u64 = 365 * 24 * 60;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Content cache configuration
    pub cache: CacheConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        if self.cache.file_name.trim().is_empty() {
            return Err(Error::Configuration("cache.file_name must not be empty".into()));
        }
        if self.cache.file_name.contains(['/', '\\']) {
            return Err(Error::Configuration(format!(
                "cache.file_name must be a plain file name, got '{}'",
                self.cache.file_name
            )));
        }
        if self.cache.update_interval_mins > MAX_UPDATE_INTERVAL_MINS {
            return Err(Error::Configuration(format!(
                "cache.update_interval_mins must be at most {}, got {}",
                MAX_UPDATE_INTERVAL_MINS, self.cache.update_interval_mins
            )));
        }
        if self.cache.wait_timeout_ms == Some(0) {
            return Err(Error::Configuration(
                "cache.wait_timeout_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Absolute location of the persisted snapshot
    #[must_use]
    pub fn cache_file_path(&self) -> PathBuf {
        self.service.base_path.join(&self.cache.file_name)
    }
}

/// Service identity and location configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base directory of the service; the snapshot file lives here
    pub base_path: PathBuf,
    /// Optional JSON document used as the datasource for complete updates
    pub datasource: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./sos-data"),
            datasource: None,
        }
    }
}

/// Content cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Snapshot file name inside the base directory
    pub file_name: String,
    /// Minutes between scheduled complete updates (0 disables scheduling)
    pub update_interval_mins: u64,
    /// Upper bound for coalesced waiters, unbounded when unset
    pub wait_timeout_ms: Option<u64>,
    /// EPSG code assumed for features without one
    pub default_epsg_code: i32,
    /// Persist the snapshot after every mutation
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_name: "cache.tmp".to_string(),
            update_interval_mins: 120,
            wait_timeout_ms: None,
            default_epsg_code: DEFAULT_EPSG_CODE,
            persist: true,
        }
    }
}

impl CacheConfig {
    /// Interval between scheduled complete updates, saturating on overflow
    #[must_use]
    pub const fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_mins.saturating_mul(60))
    }

    /// Wait bound for coalesced complete updates
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
