//! # Store Configuration
//!
//! Where the database lives and how the store behaves around it.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DUKAN_DATA_DIR=/sdcard/dukan                                       │
//! │     DUKAN_BUSY_TIMEOUT_MS=2000                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/dukan/store.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.dukan.store/store.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     platform data dir, dukan.db, 5s busy timeout                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! data_dir = "/var/lib/dukan"
//! database_name = "dukan.db"
//! busy_timeout_ms = 5000
//!
//! [retry]
//! max_attempts = 2
//!
//! [outbox]
//! max_retries = 8
//! base_backoff_secs = 30
//! max_backoff_secs = 3600
//!
//! [print]
//! max_attempts = 3
//! backoff_secs = 15
//! claim_timeout_secs = 120
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};

// =============================================================================
// Retry Settings
// =============================================================================

/// Reconnect-and-retry behaviour of the operation serializer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total attempts per operation, including the first.
    /// Default: 2 (one retry after a recoverable failure)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    2
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
        }
    }
}

// =============================================================================
// Outbox Settings
// =============================================================================

/// Retry bookkeeping for the sync outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxSettings {
    /// Failures after which a change is marked `failed`.
    #[serde(default = "default_outbox_max_retries")]
    pub max_retries: i64,

    /// Delay after the first failure; doubles per retry.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,

    /// Upper bound of the retry delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_outbox_max_retries() -> i64 {
    8
}
fn default_base_backoff() -> u64 {
    30
}
fn default_max_backoff() -> u64 {
    3600
}

impl Default for OutboxSettings {
    fn default() -> Self {
        OutboxSettings {
            max_retries: default_outbox_max_retries(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Print Settings
// =============================================================================

/// Defaults for queued print jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrintSettings {
    #[serde(default = "default_print_attempts")]
    pub max_attempts: i64,

    #[serde(default = "default_print_backoff")]
    pub backoff_secs: u64,

    /// How long a claimed job may stay `printing` before another worker
    /// may take it back.
    #[serde(default = "default_print_claim_timeout")]
    pub claim_timeout_secs: u64,
}

fn default_print_attempts() -> i64 {
    3
}
fn default_print_backoff() -> u64 {
    15
}
fn default_print_claim_timeout() -> u64 {
    120
}

impl Default for PrintSettings {
    fn default() -> Self {
        PrintSettings {
            max_attempts: default_print_attempts(),
            backoff_secs: default_print_backoff(),
            claim_timeout_secs: default_print_claim_timeout(),
        }
    }
}

// =============================================================================
// Store Configuration
// =============================================================================

/// Complete store configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = StoreConfig::new("/data/dukan")
///     .database_name("shop.db")
///     .busy_timeout(Duration::from_secs(2));
/// let store = Store::open(config).await?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Directory holding the database file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File name of the live database.
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Backup directory. Default: `<data_dir>/backups`
    #[serde(default)]
    pub backups_dir: Option<PathBuf>,

    /// Publicly visible directory that receives a second copy of each
    /// backup. `None` disables the public copy.
    #[serde(default)]
    pub downloads_dir: Option<PathBuf>,

    /// How long SQLite waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub outbox: OutboxSettings,

    #[serde(default)]
    pub print: PrintSettings,
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "dukan", "store")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn default_database_name() -> String {
    "dukan.db".to_string()
}

fn default_busy_timeout() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: default_data_dir(),
            database_name: default_database_name(),
            backups_dir: None,
            downloads_dir: None,
            busy_timeout_ms: default_busy_timeout(),
            retry: RetrySettings::default(),
            outbox: OutboxSettings::default(),
            print: PrintSettings::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration rooted at `data_dir` with default settings.
    ///
    /// No public downloads copy is configured; use [`StoreConfig::load`] or
    /// [`StoreConfig::downloads_dir`] for that.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the database file name.
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// Sets the backups directory.
    pub fn backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backups_dir = Some(dir.into());
        self
    }

    /// Enables the public downloads copy of each backup.
    pub fn downloads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.downloads_dir = Some(dir.into());
        self
    }

    /// Sets the SQLite busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the total attempts per serialized operation.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    // =========================================================================
    // Derived Paths
    // =========================================================================

    /// Full path of the live database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_name)
    }

    /// Directory backups are written to.
    pub fn backups_path(&self) -> PathBuf {
        self.backups_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }

    /// Database file name without its extension, used to name backups.
    pub fn database_stem(&self) -> String {
        Path::new(&self.database_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.database_name.clone())
    }

    pub fn busy_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (store.toml)
    /// 3. Environment variables
    ///
    /// Unless the file names one, the user's Downloads directory receives
    /// the public backup copy.
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading store config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        if config.downloads_dir.is_none() {
            config.downloads_dir = directories::UserDirs::new()
                .and_then(|dirs| dirs.download_dir().map(|d| d.join("Dukan")));
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load store config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> DbResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| DbError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Store config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database_name.trim().is_empty() {
            return Err(DbError::Config("database_name must not be empty".into()));
        }
        if self.database_name.contains(['/', '\\']) {
            return Err(DbError::Config(format!(
                "database_name must be a file name, got: {}",
                self.database_name
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(DbError::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }
        if self.outbox.base_backoff_secs > self.outbox.max_backoff_secs {
            return Err(DbError::Config(
                "outbox.base_backoff_secs exceeds outbox.max_backoff_secs".into(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `DUKAN_*` overrides from `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("DUKAN_DATA_DIR") {
            debug!(data_dir = %dir, "Overriding data dir from environment");
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(name) = lookup("DUKAN_DB_NAME") {
            self.database_name = name;
        }

        if let Some(dir) = lookup("DUKAN_BACKUPS_DIR") {
            self.backups_dir = Some(PathBuf::from(dir));
        }

        if let Some(dir) = lookup("DUKAN_DOWNLOADS_DIR") {
            // Empty value disables the public copy
            self.downloads_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }

        if let Some(timeout) = lookup("DUKAN_BUSY_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) => self.busy_timeout_ms = ms,
                Err(_) => warn!(value = %timeout, "Ignoring invalid DUKAN_BUSY_TIMEOUT_MS"),
            }
        }

        if let Some(retries) = lookup("DUKAN_OUTBOX_MAX_RETRIES") {
            match retries.parse::<i64>() {
                Ok(n) => self.outbox.max_retries = n,
                Err(_) => warn!(value = %retries, "Ignoring invalid DUKAN_OUTBOX_MAX_RETRIES"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "dukan", "store")
            .map(|dirs| dirs.config_dir().join("store.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builder_and_paths() {
        let config = StoreConfig::new("/tmp/dukan")
            .database_name("shop.db")
            .busy_timeout(Duration::from_millis(250));

        assert_eq!(config.database_path(), PathBuf::from("/tmp/dukan/shop.db"));
        assert_eq!(config.backups_path(), PathBuf::from("/tmp/dukan/backups"));
        assert_eq!(config.database_stem(), "shop");
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(config.downloads_dir.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoreConfig::new("/tmp/dukan");
        assert!(config.validate().is_ok());

        config.database_name = "nested/shop.db".into();
        assert!(config.validate().is_err());

        config.database_name = "shop.db".into();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DUKAN_DATA_DIR", "/srv/dukan"),
            ("DUKAN_DOWNLOADS_DIR", ""),
            ("DUKAN_BUSY_TIMEOUT_MS", "not-a-number"),
            ("DUKAN_OUTBOX_MAX_RETRIES", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = StoreConfig::new("/tmp/dukan").downloads_dir("/tmp/public");
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.data_dir, PathBuf::from("/srv/dukan"));
        assert!(config.downloads_dir.is_none());
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.outbox.max_retries, 3);
    }

    #[test]
    fn test_toml_partial_file_uses_defaults() {
        let config: StoreConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/dukan"

            [outbox]
            max_retries = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.database_name, "dukan.db");
        assert_eq!(config.outbox.max_retries, 4);
        assert_eq!(config.outbox.base_backoff_secs, 30);
        assert_eq!(config.retry.max_attempts, 2);
    }
}
