//! Checker configuration.
//!
//! Configuration for the claw-checker service, including:
//! - Scheduling intervals and worker pool sizes
//! - Lock and cooldown timings
//! - The remote render endpoint
//! - Logging

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CheckerError, Result};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/claw-checker/config.json";

/// Settings of the checker and its scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckerSettings {
    /// Interval between NODATA sweeps over all local triggers.
    pub nodata_check_interval_secs: u64,
    /// Interval between sweeps over remote triggers.
    pub pull_check_interval_secs: u64,
    /// Interval between tag garbage collections.
    pub tag_gc_interval_secs: u64,
    /// How far behind the last checked sample evaluation resumes.
    pub check_point_gap_secs: i64,
    /// Age after which stored samples are purged.
    pub metrics_ttl_secs: i64,
    /// Workers checking local triggers.
    pub max_parallel_checks: usize,
    /// Workers checking remote triggers.
    pub max_parallel_remote_checks: usize,
    /// Workers collecting unused tags.
    pub tag_gc_workers: usize,
    /// Capacity of each work queue.
    pub lane_capacity: usize,
    /// TTL of the distributed lock that throttles scheduling of a trigger.
    pub cooldown_secs: u64,
    /// TTL of the in-process cache of recently scheduled triggers.
    pub local_cache_ttl_millis: u64,
    /// TTL of the lock held while a trigger is being checked.
    pub check_lock_ttl_secs: u64,
    /// How long a worker waits for the check lock.
    pub check_lock_timeout_secs: u64,
    /// Interval between drains of the notification event queue.
    pub event_drain_interval_millis: u64,
    /// Events kept in the queue until drained.
    pub event_queue_capacity: usize,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            nodata_check_interval_secs: 60,
            pull_check_interval_secs: 60,
            tag_gc_interval_secs: 3600,
            check_point_gap_secs: 120,
            metrics_ttl_secs: 3 * 3600,
            max_parallel_checks: 4,
            max_parallel_remote_checks: 2,
            tag_gc_workers: 1,
            lane_capacity: 1024,
            cooldown_secs: 5,
            local_cache_ttl_millis: 1000,
            check_lock_ttl_secs: 30,
            check_lock_timeout_secs: 10,
            event_drain_interval_millis: 1000,
            event_queue_capacity: 10_000,
        }
    }
}

impl CheckerSettings {
    /// Returns the NODATA sweep interval.
    #[must_use]
    pub const fn nodata_check_interval(&self) -> Duration {
        Duration::from_secs(self.nodata_check_interval_secs)
    }

    /// Returns the remote sweep interval.
    #[must_use]
    pub const fn pull_check_interval(&self) -> Duration {
        Duration::from_secs(self.pull_check_interval_secs)
    }

    /// Returns the tag garbage collection interval.
    #[must_use]
    pub const fn tag_gc_interval(&self) -> Duration {
        Duration::from_secs(self.tag_gc_interval_secs)
    }

    /// Returns the scheduling cooldown.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Returns the TTL of the local scheduling cache.
    #[must_use]
    pub const fn local_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.local_cache_ttl_millis)
    }

    /// Returns the TTL of the check lock.
    #[must_use]
    pub const fn check_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.check_lock_ttl_secs)
    }

    /// Returns how long to wait for the check lock.
    #[must_use]
    pub const fn check_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.check_lock_timeout_secs)
    }

    /// Returns the event drain interval.
    #[must_use]
    pub const fn event_drain_interval(&self) -> Duration {
        Duration::from_millis(self.event_drain_interval_millis)
    }
}

/// Remote render endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Whether remote triggers are checked.
    pub enabled: bool,
    /// Base URL of the render service.
    pub url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            timeout_secs: 60,
        }
    }
}

impl RemoteConfig {
    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Checker and scheduler settings.
    #[serde(default)]
    pub checker: CheckerSettings,
    /// Remote render endpoint.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
    /// JSON snapshot used to seed the in-memory database.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CheckerError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parses configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| CheckerError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        let checker = &self.checker;
        let positive = [
            ("checker.nodata_check_interval_secs", checker.nodata_check_interval_secs),
            ("checker.pull_check_interval_secs", checker.pull_check_interval_secs),
            ("checker.tag_gc_interval_secs", checker.tag_gc_interval_secs),
            ("checker.max_parallel_checks", checker.max_parallel_checks as u64),
            ("checker.max_parallel_remote_checks", checker.max_parallel_remote_checks as u64),
            ("checker.tag_gc_workers", checker.tag_gc_workers as u64),
            ("checker.lane_capacity", checker.lane_capacity as u64),
            ("checker.check_lock_ttl_secs", checker.check_lock_ttl_secs),
            ("checker.event_drain_interval_millis", checker.event_drain_interval_millis),
            ("checker.event_queue_capacity", checker.event_queue_capacity as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CheckerError::Config(format!("{name} must be greater than 0")));
            }
        }

        if checker.check_point_gap_secs < 0 {
            return Err(CheckerError::Config(
                "checker.check_point_gap_secs cannot be negative".to_string(),
            ));
        }

        if checker.metrics_ttl_secs <= 0 {
            return Err(CheckerError::Config(
                "checker.metrics_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.remote.enabled {
            if self.remote.url.is_empty() {
                return Err(CheckerError::Config(
                    "remote.url cannot be empty when remote is enabled".to_string(),
                ));
            }
            if !self.remote.url.starts_with("http://") && !self.remote.url.starts_with("https://") {
                return Err(CheckerError::Config(
                    "remote.url must start with http:// or https://".to_string(),
                ));
            }
            if self.remote.timeout_secs == 0 {
                return Err(CheckerError::Config(
                    "remote.timeout_secs must be greater than 0".to_string(),
                ));
            }
        }

        if self.log.level.trim().is_empty() {
            return Err(CheckerError::Config("log.level cannot be empty".to_string()));
        }

        Ok(())
    }
}
