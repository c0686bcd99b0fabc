//! Config resolution: discovered conf file, stored settings, or a new conf.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::conf::{self, ConfError, NewConfOptions};
use crate::connection::ConnectionConfig;
use crate::paths::DaemonPaths;
use crate::settings::{Settings, SettingsStore};

/// Source of connection configs for the bootstrap.
pub trait ConfigResolver: Send + Sync {
    /// Parse the well-known daemon conf file, if there is a readable one.
    fn discover(&self) -> Option<ConnectionConfig>;

    /// Build a config from previously saved user-entered settings.
    fn load_from_stored_settings(&self) -> Option<ConnectionConfig>;

    /// Write a fresh conf file at the well-known writable location.
    fn create_config(&self, options: &NewConfOptions) -> Result<PathBuf, ConfError>;
}

/// Outcome of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigResolution {
    /// A conf file was found and parsed.
    Discovered(ConnectionConfig),
    /// No conf file, embedded mode: a new one should be created.
    CreateNew,
    /// No conf file, external daemon: whatever the user saved, if anything.
    Manual(Option<ConnectionConfig>),
}

/// Run one resolution pass.
pub fn resolve(resolver: &dyn ConfigResolver, use_embedded: bool) -> ConfigResolution {
    if let Some(config) = resolver.discover() {
        return ConfigResolution::Discovered(config);
    }
    if use_embedded {
        ConfigResolution::CreateNew
    } else {
        ConfigResolution::Manual(resolver.load_from_stored_settings())
    }
}

/// Filesystem-backed resolver over [`DaemonPaths`] and a settings store.
pub struct FileConfigResolver {
    paths: DaemonPaths,
    settings: Arc<dyn SettingsStore>,
}

impl FileConfigResolver {
    pub fn new(paths: DaemonPaths, settings: Arc<dyn SettingsStore>) -> Self {
        Self { paths, settings }
    }

    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }
}

impl ConfigResolver for FileConfigResolver {
    fn discover(&self) -> Option<ConnectionConfig> {
        let path = &self.paths.conf_file;
        if !path.is_file() {
            debug!(path = %path.display(), "No daemon conf found");
            return None;
        }
        match conf::read_conf(path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(error = %e, "Daemon conf exists but could not be read");
                None
            }
        }
    }

    fn load_from_stored_settings(&self) -> Option<ConnectionConfig> {
        Settings::new(self.settings.as_ref()).connection_config()
    }

    fn create_config(&self, options: &NewConfOptions) -> Result<PathBuf, ConfError> {
        // Never clobber something discovery could not read.
        if self.paths.conf_file.exists() {
            return Err(ConfError::Unreadable {
                path: self.paths.conf_file.clone(),
            });
        }
        conf::create_conf(&self.paths.conf_file, options)?;
        info!(path = %self.paths.conf_file.display(), "Daemon conf created");
        Ok(self.paths.conf_file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemorySettingsStore, StoredConnection};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn resolver(tmp: &TempDir) -> (FileConfigResolver, Arc<MemorySettingsStore>) {
        let store = Arc::new(MemorySettingsStore::new());
        let resolver = FileConfigResolver::new(DaemonPaths::under(tmp.path()), store.clone());
        (resolver, store)
    }

    #[test]
    fn test_discovers_existing_conf() {
        let tmp = TempDir::new().unwrap();
        let (resolver, _) = resolver(&tmp);
        std::fs::write(&resolver.paths().conf_file, "rpcuser=a\nrpcpassword=b\n").unwrap();

        match resolve(&resolver, false) {
            ConfigResolution::Discovered(config) => {
                assert_eq!(config.rpc_user, "a");
                assert_eq!(config.conf_dir.as_deref(), Some(tmp.path()));
            }
            other => panic!("expected Discovered, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_conf_embedded_wants_creation() {
        let tmp = TempDir::new().unwrap();
        let (resolver, _) = resolver(&tmp);
        assert_eq!(resolve(&resolver, true), ConfigResolution::CreateNew);
    }

    #[test]
    fn test_missing_conf_external_falls_back_to_settings() {
        let tmp = TempDir::new().unwrap();
        let (resolver, store) = resolver(&tmp);
        assert_eq!(resolve(&resolver, false), ConfigResolution::Manual(None));

        Settings::new(store.as_ref())
            .save_connection(&StoredConnection {
                host: "node.lan".into(),
                port: "9999".into(),
                rpc_user: "u".into(),
                rpc_password: "p".into(),
            })
            .unwrap();
        match resolve(&resolver, false) {
            ConfigResolution::Manual(Some(config)) => assert_eq!(config.port, 9999),
            other => panic!("expected Manual(Some), got {other:?}"),
        }
    }

    #[test]
    fn test_create_then_discover() {
        let tmp = TempDir::new().unwrap();
        let (resolver, _) = resolver(&tmp);
        let written = resolver
            .create_config(&NewConfOptions {
                datadir: None,
                use_tor: true,
            })
            .unwrap();
        assert_eq!(written, resolver.paths().conf_file);

        let config = resolver.discover().unwrap();
        assert_eq!(config.proxy.as_deref(), Some(conf::TOR_PROXY));
    }

    #[test]
    fn test_conf_path_is_directory() {
        let tmp = TempDir::new().unwrap();
        let (resolver, _) = resolver(&tmp);
        std::fs::create_dir_all(&resolver.paths().conf_file).unwrap();
        assert!(resolver.discover().is_none());
        assert!(matches!(
            resolver.create_config(&NewConfOptions::default()),
            Err(ConfError::Unreadable { .. })
        ));
    }
}
