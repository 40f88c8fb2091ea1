//! Configuration management for healthreportd.
//!
//! Loads settings from /etc/healthreport/config.toml or uses defaults.

use crate::bridge::DEFAULT_OUTBOUND_CAPACITY;
use anyhow::{Context, Result};
use healthreport_common::{WindowPolicy, EARLIEST_LAST_PING, MILLISECONDS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/healthreport/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/healthreport/config.toml";

/// Daemon process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket carrying request/response signals
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Application directory handed to the execution context
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/healthreport/healthreport.sock")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_app_dir() -> PathBuf {
    PathBuf::from("/var/lib/healthreport")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_level: default_log_level(),
            app_dir: default_app_dir(),
        }
    }
}

/// Active profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_profile_path")]
    pub path: PathBuf,
}

fn default_profile_path() -> PathBuf {
    PathBuf::from("/var/lib/healthreport/profile")
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            path: default_profile_path(),
        }
    }
}

/// Persisted preferences written by the uploader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefsConfig {
    #[serde(default = "default_prefs_path")]
    pub path: PathBuf,
}

fn default_prefs_path() -> PathBuf {
    PathBuf::from("/var/lib/healthreport/prefs.json")
}

impl Default for PrefsConfig {
    fn default() -> Self {
        Self {
            path: default_prefs_path(),
        }
    }
}

/// Report generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Background workers servicing the request queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Requests waiting beyond this are answered with an empty report
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on one generation before the empty report is sent
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    /// Floor for lastPingTime, milliseconds since epoch
    #[serde(default = "default_earliest_last_ping")]
    pub earliest_last_ping_ms: i64,

    /// Lookback for `since`
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    16
}

fn default_generation_timeout() -> u64 {
    30
}

fn default_earliest_last_ping() -> i64 {
    EARLIEST_LAST_PING
}

fn default_window_days() -> u32 {
    180
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            generation_timeout_secs: default_generation_timeout(),
            earliest_last_ping_ms: default_earliest_last_ping(),
            window_days: default_window_days(),
        }
    }
}

impl ReportConfig {
    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy {
            window_ms: i64::from(self.window_days) * MILLISECONDS_PER_DAY,
            earliest_last_ping: self.earliest_last_ping_ms,
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs.max(1))
    }

    /// Unread responses a transport client may fall behind by: every queued
    /// and running request can answer at once
    pub fn outbound_capacity(&self) -> usize {
        (self.queue_capacity + self.workers).max(DEFAULT_OUTBOUND_CAPACITY)
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub prefs: PrefsConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {:#}", e);
                Config::default()
            })
    }

    /// Load config from a specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
