//! # Sync Configuration
//!
//! Configuration for one kiosk terminal: identity, link probing, sync
//! timing, capture and storage.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KIOSK_TERMINAL_ID=kiosk-07                                         │
//! │     KIOSK_CURRENCY=SEK                                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kiosk-sync/kiosk.toml (Linux)                            │
//! │     ~/Library/Application Support/com.kiosk.kiosk-sync/kiosk.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     generated terminal id, SEK, 5 s probe interval                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # kiosk.toml
//! [terminal]
//! id = "kiosk-07"
//! name = "Entrance kiosk"
//! currency = "SEK"
//!
//! [link]
//! probe_interval_secs = 5
//! probe_timeout_ms = 2000
//!
//! [sync]
//! interval_secs = 30
//! push_timeout_ms = 5000
//! initial_backoff_ms = 500
//! max_backoff_secs = 60
//! alert_after_attempts = 10
//! resolution_retention_days = 90
//!
//! [capture]
//! direct_write_timeout_ms = 3000
//!
//! [storage]
//! database_path = "/var/lib/kiosk/queue.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use kiosk_core::validation::validate_currency;

// =============================================================================
// Terminal Configuration
// =============================================================================

/// Identity of this kiosk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Stamped on every captured sale and heartbeat.
    /// Generated on first run if not provided.
    pub id: String,

    /// Human-readable name (e.g., "Entrance kiosk").
    #[serde(default = "default_terminal_name")]
    pub name: String,

    /// Currency every sale on this terminal must use.
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_terminal_name() -> String {
    "Kiosk".to_string()
}

fn default_currency() -> String {
    kiosk_core::DEFAULT_CURRENCY.to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        TerminalConfig {
            id: format!("kiosk-{}", &id[..8]),
            name: default_terminal_name(),
            currency: default_currency(),
        }
    }
}

// =============================================================================
// Link Settings
// =============================================================================

/// Link monitor probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Interval between probes (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Deadline for a single probe (milliseconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

fn default_probe_interval() -> u64 {
    5
}

fn default_probe_timeout() -> u64 {
    2000
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkSettings {
            probe_interval_secs: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync pass scheduling and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between timer-triggered passes (seconds).
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Deadline for a single ledger push (milliseconds).
    #[serde(default = "default_push_timeout")]
    pub push_timeout_ms: u64,

    /// First retry delay after a pass with transient failures (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Attempt count at which a record is reported as stuck.
    /// Records are never dropped.
    #[serde(default = "default_alert_after_attempts")]
    pub alert_after_attempts: i64,

    /// How long resolution log entries are kept (days).
    #[serde(default = "default_resolution_retention")]
    pub resolution_retention_days: i64,
}

fn default_sync_interval() -> u64 {
    30
}
fn default_push_timeout() -> u64 {
    5000
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}
fn default_alert_after_attempts() -> i64 {
    10
}
fn default_resolution_retention() -> i64 {
    90
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_secs: default_sync_interval(),
            push_timeout_ms: default_push_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            alert_after_attempts: default_alert_after_attempts(),
            resolution_retention_days: default_resolution_retention(),
        }
    }
}

// =============================================================================
// Capture & Storage Settings
// =============================================================================

/// Capture behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Deadline for the direct ledger write while linked (milliseconds).
    #[serde(default = "default_direct_write_timeout")]
    pub direct_write_timeout_ms: u64,
}

fn default_direct_write_timeout() -> u64 {
    3000
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings {
            direct_write_timeout_ms: default_direct_write_timeout(),
        }
    }
}

/// Local queue storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file for the queue. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete kiosk sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated terminal ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config for a known terminal with default timings.
    pub fn for_terminal(id: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.terminal.id = id.into();
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (kiosk.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading kiosk config from file");
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
            warn!("Failed to load kiosk config: {}. Using defaults.", e);
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

        info!(?path, "Kiosk config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.terminal.id.trim().is_empty() {
            return Err(SyncError::MissingTerminalId);
        }

        validate_currency(&self.terminal.currency)
            .map_err(|e| SyncError::InvalidConfig(format!("terminal.currency: {}", e)))?;

        let non_zero = [
            ("link.probe_interval_secs", self.link.probe_interval_secs),
            ("link.probe_timeout_ms", self.link.probe_timeout_ms),
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.push_timeout_ms", self.sync.push_timeout_ms),
            ("sync.initial_backoff_ms", self.sync.initial_backoff_ms),
            ("capture.direct_write_timeout_ms", self.capture.direct_write_timeout_ms),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.max_backoff() < self.initial_backoff() {
            return Err(SyncError::InvalidConfig(
                "sync.max_backoff_secs must not be below sync.initial_backoff_ms".into(),
            ));
        }

        if self.sync.alert_after_attempts < 1 {
            return Err(SyncError::InvalidConfig(
                "sync.alert_after_attempts must be at least 1".into(),
            ));
        }

        if self.sync.resolution_retention_days < 1 {
            return Err(SyncError::InvalidConfig(
                "sync.resolution_retention_days must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("KIOSK_TERMINAL_ID") {
            debug!(terminal_id = %id, "Overriding terminal ID from environment");
            self.terminal.id = id;
        }

        if let Some(name) = lookup("KIOSK_TERMINAL_NAME") {
            self.terminal.name = name;
        }

        if let Some(currency) = lookup("KIOSK_CURRENCY") {
            self.terminal.currency = currency;
        }

        if let Some(path) = lookup("KIOSK_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = lookup("KIOSK_PROBE_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.link.probe_interval_secs = s,
                Err(_) => warn!(value = %secs, "Invalid KIOSK_PROBE_INTERVAL_SECS"),
            }
        }

        if let Some(secs) = lookup("KIOSK_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.interval_secs = s,
                Err(_) => warn!(value = %secs, "Invalid KIOSK_SYNC_INTERVAL_SECS"),
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "kiosk", "kiosk-sync")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("kiosk.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn terminal_id(&self) -> &str {
        &self.terminal.id
    }

    pub fn currency(&self) -> &str {
        &self.terminal.currency
    }

    /// Queue database path: configured, platform data dir, or `./kiosk.db`.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("kiosk.db")))
            .unwrap_or_else(|| PathBuf::from("kiosk.db"))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.link.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.link.probe_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.push_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.sync.max_backoff_secs)
    }

    pub fn resolution_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.sync.resolution_retention_days)
    }

    pub fn direct_write_timeout(&self) -> Duration {
        Duration::from_millis(self.capture.direct_write_timeout_ms)
    }
}
