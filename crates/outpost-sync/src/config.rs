//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     OUTPOST_API_URL=https://api.example.com                            │
//! │     OUTPOST_MAX_ATTEMPTS=5                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/outpost/sync.toml (Linux)                                │
//! │     ~/Library/Application Support/com.outpost.outpost/sync.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [api]
//! base_url = "https://api.example.com"
//! health_path = "/health"
//! request_timeout_secs = 15
//!
//! [retry]
//! base_delay_ms = 3000
//! factor = 2.0
//! max_delay_secs = 300
//! jitter_factor = 0.3
//! max_attempts = 3
//!
//! [connectivity]
//! health_interval_secs = 30
//! failure_threshold = 2
//! probe_timeout_secs = 5
//!
//! [sync]
//! follow_up_delay_ms = 500
//! page_size = 50
//! retention_days = 90
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use outpost_core::{DEFAULT_PAGE_SIZE, DEFAULT_RETENTION_DAYS, MAX_ATTEMPTS};

// =============================================================================
// API Settings
// =============================================================================

/// Where the remote API lives and how long calls may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Origin of the remote API. Request paths are joined onto it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Side-effect-free endpoint used by the connectivity monitor.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Per-request timeout (seconds). A timeout counts as a network failure.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            health_path: default_health_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiSettings {
    /// Parses the base URL.
    pub fn url(&self) -> SyncResult<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Backoff curve and attempt budget for transient failures.
///
/// ## Delay Formula
/// ```text
/// delay = clamp(base * factor^(attempts-1) * (1 + jitter), base/2, max_delay)
/// jitter ∈ [-jitter_factor, +jitter_factor]
///
/// Defaults: 3s → 6s → 12s → ... → 300s (±30%)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Must be in `[0, 1)`.
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,

    /// Attempts before an operation is permanently failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
}

fn default_base_delay() -> u64 {
    3000
}
fn default_factor() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    300
}
fn default_jitter() -> f64 {
    0.3
}
fn default_max_attempts() -> i64 {
    MAX_ATTEMPTS
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            base_delay_ms: default_base_delay(),
            factor: default_factor(),
            max_delay_secs: default_max_delay(),
            jitter_factor: default_jitter(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Health probe cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// Interval between periodic health probes (seconds).
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Consecutive probe failures that force `Offline` while `Online`.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Timeout of a single probe (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_health_interval() -> u64 {
    30
}
fn default_failure_threshold() -> u32 {
    2
}
fn default_probe_timeout() -> u64 {
    5
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            health_interval_secs: default_health_interval(),
            failure_threshold: default_failure_threshold(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl ConnectivitySettings {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Processor and pull behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Delay before a follow-up cycle when work became eligible during a
    /// cycle (milliseconds).
    #[serde(default = "default_follow_up_delay")]
    pub follow_up_delay_ms: u64,

    /// Records requested per pull page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Synced records not read for this many days may be evicted.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Pull every entity type after connectivity returns.
    #[serde(default = "default_true")]
    pub pull_on_reconnect: bool,

    /// Local database file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

fn default_follow_up_delay() -> u64 {
    500
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}
fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            follow_up_delay_ms: default_follow_up_delay(),
            page_size: default_page_size(),
            retention_days: default_retention_days(),
            pull_on_reconnect: true,
            database_path: None,
        }
    }
}

impl SyncSettings {
    pub fn follow_up_delay(&self) -> Duration {
        Duration::from_millis(self.follow_up_delay_ms)
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = self.api.url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "API URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if !self.api.health_path.starts_with('/') {
            return Err(SyncError::InvalidConfig(
                "health_path must start with '/'".into(),
            ));
        }

        let retry = &self.retry;
        if retry.base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "base_delay_ms must be greater than 0".into(),
            ));
        }
        if retry.factor < 1.0 {
            return Err(SyncError::InvalidConfig("factor must be at least 1.0".into()));
        }
        if !(0.0..1.0).contains(&retry.jitter_factor) {
            return Err(SyncError::InvalidConfig(
                "jitter_factor must be in [0, 1)".into(),
            ));
        }
        if retry.base_delay() > retry.max_delay() {
            return Err(SyncError::InvalidConfig(
                "base_delay_ms must not exceed max_delay_secs".into(),
            ));
        }
        if retry.max_attempts < 1 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }

        if self.connectivity.health_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "health_interval_secs must be greater than 0".into(),
            ));
        }
        if self.connectivity.failure_threshold == 0 {
            return Err(SyncError::InvalidConfig(
                "failure_threshold must be greater than 0".into(),
            ));
        }

        if self.sync.page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page_size must be greater than 0".into(),
            ));
        }
        if self.sync.retention_days < 1 {
            return Err(SyncError::InvalidConfig(
                "retention_days must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Applies `OUTPOST_*` overrides from a list of variables.
    ///
    /// Values that fail to parse are logged and ignored.
    fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "OUTPOST_API_URL" => {
                    debug!(url = %value, "Overriding API URL from environment");
                    self.api.base_url = value;
                }
                "OUTPOST_HEALTH_PATH" => self.api.health_path = value,
                "OUTPOST_REQUEST_TIMEOUT_SECS" => {
                    parse_into(&key, &value, &mut self.api.request_timeout_secs)
                }
                "OUTPOST_RETRY_BASE_MS" => parse_into(&key, &value, &mut self.retry.base_delay_ms),
                "OUTPOST_RETRY_MAX_SECS" => parse_into(&key, &value, &mut self.retry.max_delay_secs),
                "OUTPOST_MAX_ATTEMPTS" => parse_into(&key, &value, &mut self.retry.max_attempts),
                "OUTPOST_HEALTH_INTERVAL_SECS" => {
                    parse_into(&key, &value, &mut self.connectivity.health_interval_secs)
                }
                "OUTPOST_PAGE_SIZE" => parse_into(&key, &value, &mut self.sync.page_size),
                "OUTPOST_RETENTION_DAYS" => {
                    parse_into(&key, &value, &mut self.sync.retention_days)
                }
                "OUTPOST_DATABASE_PATH" => {
                    debug!(path = %value, "Overriding database path from environment");
                    self.sync.database_path = Some(PathBuf::from(value));
                }
                _ => {}
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "outpost", "outpost")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the database file, falling back to the platform data
    /// directory and then the working directory.
    pub fn database_path(&self) -> PathBuf {
        self.sync.database_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "outpost", "outpost")
                .map(|dirs| dirs.data_dir().join("outpost.db"))
                .unwrap_or_else(|| PathBuf::from("outpost.db"))
        })
    }

    /// Returns the full health probe URL.
    pub fn health_url(&self) -> SyncResult<Url> {
        Ok(self.api.url()?.join(&self.api.health_path)?)
    }

    pub fn max_attempts(&self) -> i64 {
        self.retry.max_attempts
    }
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, target: &mut T) {
    match value.parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value, "Ignoring unparsable environment override"),
    }
}
