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
//! │     DRIFTWOOD_REMOTE_URL=https://todo.example.com                      │
//! │     DRIFTWOOD_DB_PATH=/var/lib/app/syncstore.db                        │
//! │     DRIFTWOOD_SYNC_MODE=offline                                        │
//! │     DRIFTWOOD_TABLE=item                                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/driftwood/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/dev.driftwood.driftwood/sync.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [remote]
//! url = "https://todo.example.com"
//! table = "item"
//! query_name = "allItem"
//! request_timeout_secs = 30
//! pull_page_size = 50
//!
//! [store]
//! path = "/var/lib/app/syncstore.db"
//!
//! [sync]
//! mode = "auto"  # auto | offline
//! poll_interval_secs = 60
//! initial_backoff_ms = 500
//! max_backoff_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use driftwood_core::validation::{validate_page_size, validate_query_name, validate_table_name};
use driftwood_core::{DEFAULT_QUERY_NAME, DEFAULT_TABLE_NAME};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Mode
// =============================================================================

/// Whether the background agent talks to the remote at all.
///
/// Engine verbs always work; in `Offline` mode the agent never starts and
/// writes simply accumulate in the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Sync in the background on an interval.
    #[default]
    Auto,

    /// Background sync disabled.
    Offline,
}

impl SyncMode {
    /// Returns true if background sync is enabled.
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "online" => Ok(SyncMode::Auto),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Where and how to reach the remote table service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the service (`http` or `https`).
    #[serde(default = "default_url")]
    pub url: String,

    /// Remote table name.
    #[serde(default = "default_table")]
    pub table: String,

    /// Name of the incremental query; checkpoints are keyed by it.
    #[serde(default = "default_query_name")]
    pub query_name: String,

    /// Timeout applied to every remote call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Records fetched per page during pull.
    #[serde(default = "default_page_size")]
    pub pull_page_size: u32,
}

fn default_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_table() -> String {
    DEFAULT_TABLE_NAME.to_string()
}
fn default_query_name() -> String {
    DEFAULT_QUERY_NAME.to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_page_size() -> u32 {
    50
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            url: default_url(),
            table: default_table(),
            query_name: default_query_name(),
            request_timeout_secs: default_request_timeout(),
            pull_page_size: default_page_size(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Local database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Database file. Defaults to `<data_dir>/syncstore.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Background sync behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Sync mode.
    #[serde(default)]
    pub mode: SyncMode,

    /// Interval between background round-trips (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// First retry delay after a failed round-trip (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound of the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    300
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            poll_interval_secs: default_poll_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote service settings.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Local store settings.
    #[serde(default)]
    pub store: StoreSettings,

    /// Background sync settings.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config pointing at the given remote URL.
    pub fn with_remote_url(url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.remote.url = url.into();
        config
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
        let url = url::Url::parse(&self.remote.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Remote URL must start with http:// or https://, got: {}",
                self.remote.url
            )));
        }

        validate_table_name(&self.remote.table)?;
        validate_query_name(&self.remote.query_name)?;
        validate_page_size(self.remote.pull_page_size)?;

        if self.remote.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DRIFTWOOD_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.url = url;
        }

        if let Ok(path) = std::env::var("DRIFTWOOD_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.store.path = Some(PathBuf::from(path));
        }

        if let Ok(mode) = std::env::var("DRIFTWOOD_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Ok(table) = std::env::var("DRIFTWOOD_TABLE") {
            self.remote.table = table;
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("dev", "driftwood", "driftwood")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the database file to open: the configured path, or
    /// `<data_dir>/syncstore.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.store
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("syncstore.db")))
    }

    /// Returns the sync mode.
    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    /// Returns true if background sync is enabled.
    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    /// Returns the per-call remote timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    /// Returns the background sync interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Auto);
        assert_eq!("OFFLINE".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert!("primary".parse::<SyncMode>().is_err());
        assert!(!SyncMode::Offline.is_sync_enabled());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.remote.table, "item");
        assert_eq!(config.remote.query_name, "allItem");
        assert_eq!(config.remote.request_timeout_secs, 30);
        assert_eq!(config.remote.pull_page_size, 50);
        assert_eq!(config.sync.mode, SyncMode::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::with_remote_url("ws://localhost:8080");
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.remote.url = "not a url".into();
        assert!(config.validate().is_err());

        config.remote.url = "https://todo.example.com".into();
        assert!(config.validate().is_ok());

        config.remote.table = "items; DROP".into();
        assert!(config.validate().is_err());

        config.remote.table = "item".into();
        config.remote.pull_page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [remote]
            url = "https://todo.example.com"

            [sync]
            mode = "offline"
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.table, "item");
        assert_eq!(config.sync.mode, SyncMode::Offline);
        assert_eq!(config.sync.poll_interval_secs, 60);
        assert!(config.store.path.is_none());
    }

    #[test]
    fn test_save_and_load_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");

        let mut config = SyncConfig::with_remote_url("https://todo.example.com");
        config.store.path = Some(dir.path().join("syncstore.db"));
        config.save(Some(path.clone())).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[remote]"));
        assert!(text.contains("[sync]"));

        let parsed: SyncConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.remote.url, "https://todo.example.com");
        assert_eq!(parsed.database_path(), config.store.path);
    }
}
