#![deny(unsafe_code)]

//! Configuration for hempconnect.
//!
//! Two kinds of configuration live here:
//!
//! - [`AppConfig`]: hempconnect's own TOML settings (daemon name, embedded
//!   mode, path overrides, RPC timeout, bootstrap delays, logging).
//! - The daemon's `key=value` conf file, parsed into a [`ConnectionConfig`]
//!   by [`conf`], and located by a [`ConfigResolver`].
//!
//! Persisted user settings (manual host/port/credentials and feature flags)
//! are behind the [`settings::SettingsStore`] trait.

/// Daemon conf parsing, generation, and editing.
pub mod conf;
/// Connection snapshot types.
pub mod connection;
/// Platform-specific conf and params locations.
pub mod paths;
/// Discovered / stored / new config resolution.
pub mod resolver;
/// Persisted key-value settings.
pub mod settings;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use conf::{ConfError, NewConfOptions};
pub use connection::{ConfigSource, ConnectionConfig, RpcPassword};
pub use paths::DaemonPaths;
pub use resolver::{ConfigResolution, ConfigResolver, FileConfigResolver, resolve};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which daemon to talk to and whether to launch it ourselves.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Overrides for platform-default file locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// RPC transport settings.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Bootstrap delays and retry bounds.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Daemon selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Daemon binary name, also used in user-facing messages.
    #[serde(default = "default_daemon_name")]
    pub name: String,

    /// Launch and supervise the daemon when nothing answers on the RPC port.
    #[serde(default = "default_embedded")]
    pub embedded: bool,

    /// Explicit path to the daemon binary. Defaults to `<name>` next to the
    /// hempconnect executable.
    #[serde(default)]
    pub binary: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            name: default_daemon_name(),
            embedded: default_embedded(),
            binary: None,
        }
    }
}

fn default_daemon_name() -> String {
    "thcd".to_string()
}

fn default_embedded() -> bool {
    true
}

/// Path overrides. Anything unset uses the platform default.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub conf_file: Option<PathBuf>,

    #[serde(default)]
    pub params_dir: Option<PathBuf>,

    #[serde(default)]
    pub settings_file: Option<PathBuf>,
}

/// RPC transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

/// Bootstrap delays, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Poll interval while the daemon reports it is warming up.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between a successful probe and handing off the connection.
    #[serde(default = "default_connected_grace_ms")]
    pub connected_grace_ms: u64,

    /// Wait after launching (or finding running) the embedded daemon.
    #[serde(default = "default_launch_wait_ms")]
    pub launch_wait_ms: u64,

    /// Wait for a `daemon=1` daemon that forked into the background.
    #[serde(default = "default_detached_wait_ms")]
    pub detached_wait_ms: u64,

    /// Wait before the final probe after a failed launch.
    #[serde(default = "default_last_resort_wait_ms")]
    pub last_resort_wait_ms: u64,

    /// How many refused probes to tolerate while the embedded daemon runs.
    #[serde(default = "default_max_launch_waits")]
    pub max_launch_waits: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            connected_grace_ms: default_connected_grace_ms(),
            launch_wait_ms: default_launch_wait_ms(),
            detached_wait_ms: default_detached_wait_ms(),
            last_resort_wait_ms: default_last_resort_wait_ms(),
            max_launch_waits: default_max_launch_waits(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_connected_grace_ms() -> u64 {
    2000
}

fn default_launch_wait_ms() -> u64 {
    1000
}

fn default_detached_wait_ms() -> u64 {
    5000
}

fn default_last_resort_wait_ms() -> u64 {
    2000
}

fn default_max_launch_waits() -> u32 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "daemon.name must not be empty".to_string(),
            ));
        }
        if self.rpc.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "rpc.timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.bootstrap.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "bootstrap.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.bootstrap.max_launch_waits == 0 {
            return Err(ConfigError::Validation(
                "bootstrap.max_launch_waits must be at least 1".to_string(),
            ));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }
        Ok(())
    }

    /// Resolved conf/params/settings locations.
    pub fn daemon_paths(&self) -> DaemonPaths {
        DaemonPaths::resolve(&self.paths)
    }
}
