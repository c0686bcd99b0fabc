//! Persisted user settings.
//!
//! The storage mechanism sits behind [`SettingsStore`]: a flat map of string
//! keys to string values. [`FileSettingsStore`] persists it as TOML;
//! [`MemorySettingsStore`] keeps it in memory. [`Settings`] layers the typed
//! keys the bootstrap and wallet use on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::conf::MAINNET_RPC_PORT;
use crate::connection::{ConnectionConfig, LOOPBACK_HOST};

pub const KEY_HOST: &str = "connection/host";
pub const KEY_PORT: &str = "connection/port";
pub const KEY_RPC_USER: &str = "connection/rpcuser";
pub const KEY_RPC_PASSWORD: &str = "connection/rpcpassword";
pub const KEY_AUTO_SHIELD: &str = "options/autoshield";
pub const KEY_CUSTOM_FEES: &str = "options/customfees";
pub const KEY_SAVE_SENT_TX: &str = "options/savesenttx";

/// Errors from the settings store.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("settings store lock poisoned")]
    Poisoned,
}

/// Key-value read/write interface over persisted settings.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// In-memory settings, lost on drop.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Settings persisted as a flat TOML table; every `set` rewrites the file.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettingsStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(SettingsError::Read { path, source }),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(values)?;
        std::fs::write(&self.path, content).map_err(write_err)?;
        debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }
}

/// Host/port/credentials the user entered for a manually managed daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredConnection {
    pub host: String,
    pub port: String,
    pub rpc_user: String,
    pub rpc_password: String,
}

/// Typed view over a [`SettingsStore`].
pub struct Settings<'a> {
    store: &'a dyn SettingsStore,
}

impl<'a> Settings<'a> {
    pub fn new(store: &'a dyn SettingsStore) -> Self {
        Self { store }
    }

    fn value(&self, key: &str) -> String {
        self.store.get(key).unwrap_or_default()
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.store.get(key).as_deref() {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            _ => default,
        }
    }

    /// The raw stored connection values (blank when unset).
    pub fn connection(&self) -> StoredConnection {
        StoredConnection {
            host: self.value(KEY_HOST),
            port: self.value(KEY_PORT),
            rpc_user: self.value(KEY_RPC_USER),
            rpc_password: self.value(KEY_RPC_PASSWORD),
        }
    }

    pub fn save_connection(&self, connection: &StoredConnection) -> Result<(), SettingsError> {
        self.store.set(KEY_HOST, &connection.host)?;
        self.store.set(KEY_PORT, &connection.port)?;
        self.store.set(KEY_RPC_USER, &connection.rpc_user)?;
        self.store.set(KEY_RPC_PASSWORD, &connection.rpc_password)
    }

    /// Connection config for the manual-connect path.
    ///
    /// `None` when either credential is blank. A blank host means loopback; a
    /// blank or unparseable port means the mainnet default.
    pub fn connection_config(&self) -> Option<ConnectionConfig> {
        let stored = self.connection();
        if stored.rpc_user.is_empty() || stored.rpc_password.is_empty() {
            return None;
        }

        let host = if stored.host.trim().is_empty() {
            LOOPBACK_HOST.to_string()
        } else {
            stored.host.trim().to_string()
        };
        let port = stored.port.trim().parse().unwrap_or(MAINNET_RPC_PORT);

        Some(ConnectionConfig::user_settings(
            host,
            port,
            stored.rpc_user,
            stored.rpc_password,
        ))
    }

    pub fn auto_shield(&self) -> bool {
        self.flag(KEY_AUTO_SHIELD, false)
    }

    pub fn set_auto_shield(&self, allow: bool) -> Result<(), SettingsError> {
        self.store.set(KEY_AUTO_SHIELD, &allow.to_string())
    }

    pub fn allow_custom_fees(&self) -> bool {
        self.flag(KEY_CUSTOM_FEES, false)
    }

    pub fn set_allow_custom_fees(&self, allow: bool) -> Result<(), SettingsError> {
        self.store.set(KEY_CUSTOM_FEES, &allow.to_string())
    }

    pub fn save_sent_txs(&self) -> bool {
        self.flag(KEY_SAVE_SENT_TX, true)
    }

    pub fn set_save_sent_txs(&self, save: bool) -> Result<(), SettingsError> {
        self.store.set(KEY_SAVE_SENT_TX, &save.to_string())
    }
}
