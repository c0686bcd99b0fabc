//! Configuration builders for tests.

use std::path::{Path, PathBuf};

use hempconnect_config::{AppConfig, ConfigSource, ConnectionConfig, RpcPassword};

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .embedded(false)
///     .paths_under(tmp.path())
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn daemon_name(mut self, name: &str) -> Self {
        self.config.daemon.name = name.to_string();
        self
    }

    pub fn embedded(mut self, embedded: bool) -> Self {
        self.config.daemon.embedded = embedded;
        self
    }

    /// Point the conf file, params dir, and settings file under `root`.
    pub fn paths_under(mut self, root: &Path) -> Self {
        self.config.paths.conf_file = Some(root.join("THC.conf"));
        self.config.paths.params_dir = Some(root.join("params"));
        self.config.paths.settings_file = Some(root.join("settings.toml"));
        self
    }

    pub fn rpc_timeout_secs(mut self, secs: u64) -> Self {
        self.config.rpc.timeout_secs = secs;
        self
    }

    pub fn max_launch_waits(mut self, n: u32) -> Self {
        self.config.bootstrap.max_launch_waits = n;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`ConnectionConfig`], defaulting to a discovered local conf.
pub struct TestConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl TestConnectionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig {
                host: "127.0.0.1".to_string(),
                port: 36790,
                rpc_user: "thc".to_string(),
                rpc_password: RpcPassword::new("test-password"),
                proxy: None,
                uses_conf_file: true,
                daemon_detached: false,
                conf_dir: Some(PathBuf::from("/tmp/thc")),
                source: ConfigSource::DiscoveredConf,
            },
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.config.host = host.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn credentials(mut self, user: &str, password: &str) -> Self {
        self.config.rpc_user = user.to_string();
        self.config.rpc_password = RpcPassword::new(password);
        self
    }

    /// `daemon=1` in the conf.
    pub fn detached(mut self, detached: bool) -> Self {
        self.config.daemon_detached = detached;
        self
    }

    /// As if loaded from saved settings instead of a conf file.
    pub fn from_settings(mut self) -> Self {
        self.config.uses_conf_file = false;
        self.config.conf_dir = None;
        self.config.source = ConfigSource::UserSettings;
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

impl Default for TestConnectionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
