//! # Engine Configuration
//!
//! Configuration management for the offline queue engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_PRIMARY_PROBE=10.0.0.1:443                                   │
//! │     TALLY_STORAGE_BACKEND=json                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally/sync.toml (Linux)                                  │
//! │     ~/Library/Application Support/tally/sync.toml (macOS)              │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     8.8.8.8:53 / 1.1.1.1:53, poll every 5s, SQLite store               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [monitor]
//! primary_target = "8.8.8.8:53"
//! secondary_target = "1.1.1.1:53"
//! poll_interval_secs = 5
//! probe_timeout_secs = 3
//!
//! [storage]
//! backend = "sqlite"          # sqlite | json | memory
//! path = "/var/lib/tally/queue.db"
//!
//! [queue]
//! max_attempts = 0            # 0 = retry forever
//!
//! [sync]
//! apply_timeout_secs = 30     # 0 = no limit
//! drain_on_start = true
//!
//! [numbering]
//! offline_prefix = "OFF"
//! online_prefix = "INV"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineResult, SyncError};
use tally_core::numbering::validate_prefix;
use tally_db::{DbConfig, JsonFileSnapshotStore, MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};

// =============================================================================
// Monitor Settings
// =============================================================================

/// Reachability probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// `host:port` tried first. Success means ONLINE.
    #[serde(default = "default_primary_target")]
    pub primary_target: String,

    /// `host:port` tried when the primary fails. Success means UNSTABLE.
    #[serde(default = "default_secondary_target")]
    pub secondary_target: String,

    /// Seconds between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Connect timeout per target (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_primary_target() -> String {
    "8.8.8.8:53".to_string()
}

fn default_secondary_target() -> String {
    "1.1.1.1:53".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_probe_timeout() -> u64 {
    3
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            primary_target: default_primary_target(),
            secondary_target: default_secondary_target(),
            poll_interval_secs: default_poll_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Which snapshot store backs the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// SQLite database (WAL).
    #[default]
    Sqlite,
    /// Single JSON file replaced atomically.
    Json,
    /// Process memory only. Nothing survives a restart.
    Memory,
}

impl StorageBackend {
    fn default_file_name(&self) -> &'static str {
        match self {
            StorageBackend::Sqlite => "queue.db",
            StorageBackend::Json => "queue.json",
            StorageBackend::Memory => "",
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Sqlite => write!(f, "sqlite"),
            StorageBackend::Json => write!(f, "json"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "db" => Ok(StorageBackend::Sqlite),
            "json" | "file" => Ok(StorageBackend::Json),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown storage backend: '{}'. Valid options: sqlite, json, memory",
                other
            ))),
        }
    }
}

/// Where the queue snapshot lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Snapshot location. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolves the snapshot path, falling back to the data directory.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if self.backend == StorageBackend::Memory {
            return None;
        }
        self.path.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "tally")
                .map(|dirs| dirs.data_dir().join(self.backend.default_file_name()))
        })
    }

    /// Opens the configured store.
    pub async fn open_store(&self) -> EngineResult<Arc<dyn SnapshotStore>> {
        let store: Arc<dyn SnapshotStore> = match self.backend {
            StorageBackend::Memory => Arc::new(MemorySnapshotStore::new()),
            StorageBackend::Json => Arc::new(JsonFileSnapshotStore::new(self.require_path()?)),
            StorageBackend::Sqlite => {
                Arc::new(SqliteSnapshotStore::open(DbConfig::new(self.require_path()?)).await?)
            }
        };

        info!(backend = %self.backend, location = %store.describe(), "Snapshot store opened");
        Ok(store)
    }

    fn require_path(&self) -> EngineResult<PathBuf> {
        self.resolved_path().ok_or_else(|| {
            SyncError::InvalidConfig("No storage path configured and no data directory available".into())
        })
    }
}

// =============================================================================
// Queue / Sync / Numbering Settings
// =============================================================================

/// Queue policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Failed attempts after which an item is escalated to CONFLICT.
    /// Set to 0 for infinite retries.
    #[serde(default)]
    pub max_attempts: u32,
}

/// Drain behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Upper bound on one remote apply (seconds). 0 disables the bound.
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: u64,

    /// Drain leftovers from the previous run once the first poll says
    /// the remote is reachable.
    #[serde(default = "default_true")]
    pub drain_on_start: bool,
}

fn default_apply_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            apply_timeout_secs: default_apply_timeout(),
            drain_on_start: true,
        }
    }
}

impl SyncSettings {
    pub fn apply_timeout(&self) -> Option<Duration> {
        (self.apply_timeout_secs > 0).then(|| Duration::from_secs(self.apply_timeout_secs))
    }
}

/// Record number prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingSettings {
    /// Marks numbers minted while the remote was unreachable.
    #[serde(default = "default_offline_prefix")]
    pub offline_prefix: String,

    #[serde(default = "default_online_prefix")]
    pub online_prefix: String,
}

fn default_offline_prefix() -> String {
    "OFF".to_string()
}

fn default_online_prefix() -> String {
    "INV".to_string()
}

impl Default for NumberingSettings {
    fn default() -> Self {
        NumberingSettings {
            offline_prefix: default_offline_prefix(),
            online_prefix: default_online_prefix(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub numbering: NumberingSettings,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
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
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
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
    pub fn validate(&self) -> EngineResult<()> {
        for (name, target) in [
            ("primary_target", &self.monitor.primary_target),
            ("secondary_target", &self.monitor.secondary_target),
        ] {
            let valid = target
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be host:port, got: '{}'",
                    name, target
                )));
            }
        }

        if self.monitor.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.monitor.probe_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe_timeout_secs must be greater than 0".into(),
            ));
        }

        validate_prefix(&self.numbering.offline_prefix)?;
        validate_prefix(&self.numbering.online_prefix)?;

        if self.numbering.offline_prefix == self.numbering.online_prefix {
            return Err(SyncError::InvalidConfig(
                "offline_prefix and online_prefix must differ".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(target) = lookup("TALLY_PRIMARY_PROBE") {
            debug!(target = %target, "Overriding primary probe from environment");
            self.monitor.primary_target = target;
        }

        if let Some(target) = lookup("TALLY_SECONDARY_PROBE") {
            debug!(target = %target, "Overriding secondary probe from environment");
            self.monitor.secondary_target = target;
        }

        if let Some(interval) = lookup("TALLY_POLL_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => self.monitor.poll_interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring non-numeric TALLY_POLL_INTERVAL_SECS"),
            }
        }

        if let Some(backend) = lookup("TALLY_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(parsed) => self.storage.backend = parsed,
                Err(_) => warn!(backend = %backend, "Unknown storage backend in environment"),
            }
        }

        if let Some(path) = lookup("TALLY_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Some(prefix) = lookup("TALLY_OFFLINE_PREFIX") {
            self.numbering.offline_prefix = prefix;
        }

        if let Some(prefix) = lookup("TALLY_ONLINE_PREFIX") {
            self.numbering.online_prefix = prefix;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "tally")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.monitor.primary_target, "8.8.8.8:53");
        assert_eq!(config.monitor.secondary_target, "1.1.1.1:53");
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.monitor.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.queue.max_attempts, 0);
        assert_eq!(config.sync.apply_timeout(), Some(Duration::from_secs(30)));
        assert!(config.sync.drain_on_start);
        assert_eq!(config.numbering.offline_prefix, "OFF");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [storage]
            backend = "json"
            path = "/tmp/tally/queue.json"

            [sync]
            apply_timeout_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert_eq!(config.storage.resolved_path(), Some(PathBuf::from("/tmp/tally/queue.json")));
        assert_eq!(config.sync.apply_timeout(), None);
        assert!(config.sync.drain_on_start);
        assert_eq!(config.monitor, MonitorSettings::default());
    }

    #[test]
    fn test_validation() {
        let mut config = SyncConfig::default();

        config.monitor.primary_target = "8.8.8.8".into();
        assert!(config.validate().is_err());
        config.monitor.primary_target = "api.example.com:443".into();
        assert!(config.validate().is_ok());

        config.monitor.poll_interval_secs = 0;
        assert!(config.validate().unwrap_err().is_config_error());
        config.monitor.poll_interval_secs = 5;

        config.numbering.offline_prefix = "off".into();
        assert!(matches!(config.validate(), Err(SyncError::Validation(_))));

        config.numbering.offline_prefix = "INV".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TALLY_PRIMARY_PROBE", "10.0.0.1:443"),
            ("TALLY_POLL_INTERVAL_SECS", "not-a-number"),
            ("TALLY_STORAGE_BACKEND", "memory"),
            ("TALLY_OFFLINE_PREFIX", "LOCAL"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.monitor.primary_target, "10.0.0.1:443");
        assert_eq!(config.monitor.poll_interval_secs, 5);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.resolved_path(), None);
        assert_eq!(config.numbering.offline_prefix, "LOCAL");
    }

    #[test]
    fn test_save_then_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("sync.toml");

        let mut config = SyncConfig::default();
        config.queue.max_attempts = 7;
        config.storage.backend = StorageBackend::Json;
        config.storage.path = Some(dir.path().join("queue.json"));
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[monitor]"));
        assert!(contents.contains("[numbering]"));

        let loaded: SyncConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("SQLite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert_eq!("file".parse::<StorageBackend>().unwrap(), StorageBackend::Json);
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    #[tokio::test]
    async fn test_open_json_store() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StorageSettings {
            backend: StorageBackend::Json,
            path: Some(dir.path().join("queue.json")),
        };

        let store = settings.open_store().await.unwrap();
        assert!(store.describe().starts_with("json:"));
        assert!(store.load().await.is_empty());
    }
}
