//! The connection snapshot shared by the resolver, the transport, and the
//! bootstrap orchestrator.

use std::fmt;
use std::path::PathBuf;

use zeroize::Zeroize;

/// Loopback address used for every config discovered from a daemon conf file.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// RPC password with automatic zeroization.
///
/// Redacted in `Debug` output so connection configs can be logged freely.
#[derive(Clone, PartialEq, Eq)]
pub struct RpcPassword {
    inner: String,
}

impl RpcPassword {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// The raw password. Only the transport should need this.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for RpcPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcPassword")
            .field("inner", &"[REDACTED]")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Drop for RpcPassword {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

/// Where a [`ConnectionConfig`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from the daemon's conf file; the daemon is local.
    DiscoveredConf,
    /// Built from host/port/credentials the user entered in settings.
    UserSettings,
}

/// Immutable snapshot of everything needed to reach the daemon's RPC port.
///
/// Built once per bootstrap attempt. A retry with different values builds a
/// new snapshot instead of mutating this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub rpc_user: String,
    pub rpc_password: RpcPassword,
    /// `proxy=` line from the conf file, passed through untouched.
    pub proxy: Option<String>,
    /// Whether this config was read from the daemon conf file.
    pub uses_conf_file: bool,
    /// `daemon=1`: the daemon forks into the background on its own.
    pub daemon_detached: bool,
    /// Directory containing the conf file, when there is one.
    pub conf_dir: Option<PathBuf>,
    pub source: ConfigSource,
}

impl ConnectionConfig {
    /// Config for a manually configured daemon.
    pub fn user_settings(
        host: impl Into<String>,
        port: u16,
        rpc_user: impl Into<String>,
        rpc_password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            rpc_user: rpc_user.into(),
            rpc_password: RpcPassword::new(rpc_password),
            proxy: None,
            uses_conf_file: false,
            daemon_detached: false,
            conf_dir: None,
            source: ConfigSource::UserSettings,
        }
    }

    /// `http://host:port/` endpoint for JSON-RPC posts.
    pub fn endpoint_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}
