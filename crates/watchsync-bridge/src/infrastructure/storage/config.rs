//! TOML-based configuration persistence for the bridge.
//!
//! Reads and writes `BridgeConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\WatchSync\config.toml`
//! - Linux:    `~/.config/watchsync/config.toml`
//! - macOS:    `~/Library/Application Support/WatchSync/config.toml`
//!
//! An explicit path (the `--config` flag) bypasses the platform lookup.
//!
//! # Example
//!
//! ```toml
//! [bridge]
//! log_level = "debug"
//!
//! [remote_bus]
//! address = "tcp:host=192.168.2.15,port=55556"
//!
//! [media]
//! identity = "Pixel"
//!
//! [notifications]
//! default_option = "normal-vibration"
//! allowed_ongoing = ["com.google.android.apps.maps"]
//!
//! [notifications.apps]
//! "org.example.chat" = "strong-vibration"
//! "org.example.news" = "no-notifications"
//!
//! [time]
//! utc_offset_minutes = 120   # omit to follow the system time zone
//!
//! [silent_mode]
//! enabled = true
//! ```
//!
//! Every section and field is optional.  Missing values take the defaults
//! below, so a first run without a file works out of the box.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use watchsync_core::protocol::names::{DEFAULT_BUS_ADDRESS, DEFAULT_MPRIS_BUS_NAME};
use watchsync_core::NotificationOption;

use crate::application::media_bridge::MediaBridgeSettings;
use crate::application::time_sync::TimeSyncSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level bridge configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: GeneralConfig,
    #[serde(default)]
    pub remote_bus: RemoteBusConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub silent_mode: SilentModeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the watch's bus listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteBusConfig {
    #[serde(default = "default_bus_address")]
    pub address: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    /// Well-known name the media player is exported under.
    #[serde(default = "default_mpris_bus_name")]
    pub bus_name: String,
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default = "default_property_timeout_ms")]
    pub property_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    /// Option for packages without an entry in `apps`.
    #[serde(default)]
    pub default_option: NotificationOption,
    /// Per-package options.
    #[serde(default)]
    pub apps: BTreeMap<String, NotificationOption>,
    /// Packages whose ongoing notifications are still forwarded.
    #[serde(default = "default_allowed_ongoing")]
    pub allowed_ongoing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeConfig {
    #[serde(default = "default_true")]
    pub sync_time: bool,
    /// Fixed UTC offset overriding the system time zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

/// Silences the phone's ringer while the watch is connected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SilentModeConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bus_address() -> String {
    DEFAULT_BUS_ADDRESS.to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_mpris_bus_name() -> String {
    DEFAULT_MPRIS_BUS_NAME.to_string()
}
fn default_identity() -> String {
    "Android".to_string()
}
fn default_property_timeout_ms() -> u64 {
    500
}
fn default_allowed_ongoing() -> Vec<String> {
    vec![
        "com.google.android.apps.maps".to_string(),
        "org.thoughtcrime.securesms".to_string(),
    ]
}
fn default_true() -> bool {
    true
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for RemoteBusConfig {
    fn default() -> Self {
        Self {
            address: default_bus_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            bus_name: default_mpris_bus_name(),
            identity: default_identity(),
            property_timeout_ms: default_property_timeout_ms(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            default_option: NotificationOption::Default,
            apps: BTreeMap::new(),
            allowed_ongoing: default_allowed_ongoing(),
        }
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            sync_time: default_true(),
            utc_offset_minutes: None,
        }
    }
}

// ── Conversions into runtime settings ─────────────────────────────────────────

impl RemoteBusConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl MediaConfig {
    pub fn to_settings(&self) -> MediaBridgeSettings {
        MediaBridgeSettings {
            bus_name: self.bus_name.clone(),
            identity: self.identity.clone(),
            property_timeout: Duration::from_millis(self.property_timeout_ms),
        }
    }
}

impl TimeConfig {
    pub fn to_settings(&self) -> TimeSyncSettings {
        TimeSyncSettings {
            enabled: self.sync_time,
            utc_offset_minutes: self.utc_offset_minutes,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the platform location, or defaults if absent.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<BridgeConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning defaults if it does not exist.
pub fn load_config_from(path: &Path) -> Result<BridgeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BridgeConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform location.
pub fn save_config(config: &BridgeConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &BridgeConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("WatchSync"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("watchsync"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("WatchSync")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
