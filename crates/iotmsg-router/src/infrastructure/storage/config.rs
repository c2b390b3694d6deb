//! TOML-based configuration for the router.
//!
//! Reads and writes [`AppConfig`] from an explicit path or from the
//! platform-appropriate config file:
//! - Windows:  `%APPDATA%\iotmsg\config.toml`
//! - Linux:    `~/.config/iotmsg/config.toml`
//! - macOS:    `~/Library/Application Support/iotmsg/config.toml`
//!
//! # What does a config file look like? (for beginners)
//!
//! ```toml
//! [router]
//! tick_ms = 50
//! log_level = "info"
//!
//! [[connections]]
//! name = "sensors"
//! kind = "loopback"
//!
//! [[connections.routes]]
//! name = "relays"
//! stop_if_handled = true
//! buffer_capacity = 16
//! filter.text = { op = "starts_with", text = "relay", ignore_case = true }
//!
//! [[connections]]
//! name = "console"
//! kind = "log_sink"
//!
//! [[bridges]]
//! name = "mirror"
//! object1 = "sensors"
//! object2 = "console"
//! direction = "one_to_two_only"
//! ```
//!
//! # Serde default values
//!
//! Every field is either optional or has a `#[serde(default = "...")]`
//! helper, so an empty file is a valid configuration and older files keep
//! loading when new fields are added.

use std::path::{Path, PathBuf};
use std::time::Duration;

use iotmsg_core::FilterSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::bridge::BridgeDirection;
use crate::application::connection_manager::{
    ManagerSettings, DEFAULT_DRAIN_BATCH, DEFAULT_POLL_MAX,
};
use crate::application::outbound::{RetryPolicy, DEFAULT_PUSH_ATTEMPTS};
use crate::application::route::RouteKind;
use crate::infrastructure::connections::loopback::DEFAULT_LOOPBACK_CAPACITY;

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

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
    #[serde(default)]
    pub bridges: Vec<BridgeEntry>,
}

/// Poll scheduler and outbound queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    /// Pause between poll ticks, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Inbound messages taken per connection per tick.
    #[serde(default = "default_poll_max")]
    pub poll_max: usize,
    /// Outbound items sent per tick.
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,
    /// Capacity of the shared outbound queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Push attempts before queued output is dropped.
    #[serde(default = "default_push_attempts")]
    pub push_attempts: u32,
    /// Pause after each failed push, in milliseconds.
    #[serde(default = "default_push_retry_ms")]
    pub push_retry_ms: u64,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which in-process transport backs a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    #[default]
    Loopback,
    LogSink,
}

/// One connection and its routes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionEntry {
    pub name: String,
    #[serde(default)]
    pub kind: ConnectionKind,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Line capacity for transports that buffer (loopback).
    #[serde(default = "default_connection_capacity")]
    pub capacity: usize,
    /// Routes in evaluation order.  These are also what `RESET` restores.
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

/// One route declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteEntry {
    pub name: String,
    #[serde(default)]
    pub kind: RouteKind,
    #[serde(default)]
    pub always_use: bool,
    #[serde(default)]
    pub stop_if_handled: bool,
    /// Give the route a buffer of this many messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_capacity: Option<usize>,
    /// Queue accepted messages as output on this connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_to: Option<String>,
    #[serde(default)]
    pub filter: FilterSet,
}

/// One bridge declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeEntry {
    pub name: String,
    pub object1: String,
    pub object2: String,
    #[serde(default)]
    pub direction: BridgeDirection,
    /// Activate the bridge at startup.
    #[serde(default)]
    pub active: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_tick_ms() -> u64 {
    50
}
fn default_poll_max() -> usize {
    DEFAULT_POLL_MAX
}
fn default_drain_batch() -> usize {
    DEFAULT_DRAIN_BATCH
}
fn default_outbound_capacity() -> usize {
    64
}
fn default_push_attempts() -> u32 {
    DEFAULT_PUSH_ATTEMPTS
}
fn default_push_retry_ms() -> u64 {
    200
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_connection_capacity() -> usize {
    DEFAULT_LOOPBACK_CAPACITY
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            poll_max: default_poll_max(),
            drain_batch: default_drain_batch(),
            outbound_capacity: default_outbound_capacity(),
            push_attempts: default_push_attempts(),
            push_retry_ms: default_push_retry_ms(),
            log_level: default_log_level(),
        }
    }
}

impl RouterConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            poll_max: self.poll_max,
            drain_batch: self.drain_batch,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.push_attempts,
            delay: Duration::from_millis(self.push_retry_ms),
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

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the default location.  See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
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

/// Resolves the platform config base directory plus the `iotmsg` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("iotmsg"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("iotmsg"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("iotmsg")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use iotmsg_core::{CompareOp, FilterItem, FilterSlot};

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("iotmsg-config-test-{tag}-{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_router_config_defaults() {
        // Arrange / Act
        let cfg = RouterConfig::default();

        // Assert
        assert_eq!(cfg.tick_ms, 50);
        assert_eq!(cfg.poll_max, 8);
        assert_eq!(cfg.drain_batch, 5);
        assert_eq!(cfg.outbound_capacity, 64);
        assert_eq!(cfg.push_attempts, 10);
        assert_eq!(cfg.push_retry_ms, 200);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_empty_file_is_a_valid_default_config() {
        let cfg: AppConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(cfg, AppConfig::default());
        assert!(cfg.connections.is_empty());
        assert!(cfg.bridges.is_empty());
    }

    #[test]
    fn test_retry_policy_and_settings_follow_router_config() {
        let cfg = RouterConfig {
            push_attempts: 3,
            push_retry_ms: 25,
            drain_batch: 2,
            ..RouterConfig::default()
        };
        assert_eq!(cfg.retry_policy().attempts, 3);
        assert_eq!(cfg.retry_policy().delay, Duration::from_millis(25));
        assert_eq!(cfg.manager_settings().drain_batch, 2);
        assert_eq!(cfg.tick(), Duration::from_millis(50));
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_parses_connections_routes_and_bridges() {
        // Arrange
        let text = r#"
            [router]
            tick_ms = 20

            [[connections]]
            name = "sensors"

            [[connections.routes]]
            name = "relays"
            kind = "command"
            stop_if_handled = true
            buffer_capacity = 16
            filter.text = { op = "starts_with", text = "relay", ignore_case = true }

            [[connections]]
            name = "console"
            kind = "log_sink"
            active = false

            [[bridges]]
            name = "mirror"
            object1 = "sensors"
            object2 = "console"
            direction = "one_to_two_only"
        "#;

        // Act
        let cfg: AppConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.router.tick_ms, 20);
        assert_eq!(cfg.router.poll_max, 8, "unset fields keep defaults");
        assert_eq!(cfg.connections.len(), 2);
        let sensors = &cfg.connections[0];
        assert_eq!(sensors.kind, ConnectionKind::Loopback);
        assert!(sensors.active);
        let route = &sensors.routes[0];
        assert_eq!(route.kind, RouteKind::Command);
        assert!(route.stop_if_handled);
        assert_eq!(route.buffer_capacity, Some(16));
        assert_eq!(
            route.filter.slot(FilterSlot::Text),
            &FilterItem::new(CompareOp::StartsWith, "relay", true)
        );
        assert_eq!(cfg.connections[1].kind, ConnectionKind::LogSink);
        assert!(!cfg.connections[1].active);
        assert_eq!(cfg.bridges[0].direction, BridgeDirection::OneToTwoOnly);
        assert!(!cfg.bridges[0].active);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let path = temp_path("malformed");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "[[connections]]\nname = ").expect("write");

        let err = load_config_from(&path).expect_err("must fail");

        assert!(matches!(err, ConfigError::Parse(_)));
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    // ── Repository ────────────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_file_returns_default() {
        let cfg = load_config_from(&temp_path("missing")).expect("missing file is fine");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        // Arrange
        let path = temp_path("roundtrip");
        let mut cfg = AppConfig::default();
        cfg.router.tick_ms = 10;
        cfg.connections.push(ConnectionEntry {
            name: "dev1".to_string(),
            kind: ConnectionKind::Loopback,
            active: true,
            capacity: 8,
            routes: vec![RouteEntry {
                name: "fwd".to_string(),
                kind: RouteKind::None,
                always_use: true,
                stop_if_handled: false,
                buffer_capacity: None,
                forward_to: Some("console".to_string()),
                filter: FilterSet::new().with(
                    FilterSlot::To,
                    FilterItem::new(CompareOp::NotEquals, "dev1", false),
                ),
            }],
        });
        cfg.bridges.push(BridgeEntry {
            name: "b".to_string(),
            object1: "dev1".to_string(),
            object2: "console".to_string(),
            direction: BridgeDirection::TwoToOneOnly,
            active: true,
        });

        // Act
        save_config_to(&cfg, &path).expect("save");
        let restored = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(cfg, restored);
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }
}
