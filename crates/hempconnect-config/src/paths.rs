//! Platform-specific locations of the daemon conf file and params directory.

use std::path::{Path, PathBuf};

use crate::PathsConfig;

/// Conf file location relative to the platform base directory.
#[cfg(target_os = "macos")]
const CONF_RELATIVE: &str = "Library/Application Support/Komodo/THC/THC.conf";
#[cfg(all(unix, not(target_os = "macos")))]
const CONF_RELATIVE: &str = ".komodo/THC/THC.conf";
#[cfg(windows)]
const CONF_RELATIVE: &str = "Komodo/THC/THC.conf";

#[cfg(target_os = "macos")]
const PARAMS_RELATIVE: &str = "Library/Application Support/ZcashParams";
#[cfg(all(unix, not(target_os = "macos")))]
const PARAMS_RELATIVE: &str = ".zcash-params";
#[cfg(windows)]
const PARAMS_RELATIVE: &str = "ZcashParams";

/// File name of the persisted settings store.
const SETTINGS_FILE: &str = "hempconnect/settings.toml";

/// Resolved filesystem locations used during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    /// Where the daemon conf file lives (or will be written).
    pub conf_file: PathBuf,
    /// Directory holding the cryptographic parameter files.
    pub params_dir: PathBuf,
    /// Persisted key-value settings.
    pub settings_file: PathBuf,
}

impl DaemonPaths {
    /// Platform defaults, with any overrides from `[paths]` applied.
    pub fn resolve(overrides: &PathsConfig) -> Self {
        let base = platform_base_dir();
        Self {
            conf_file: overrides
                .conf_file
                .clone()
                .unwrap_or_else(|| base.join(CONF_RELATIVE)),
            params_dir: overrides
                .params_dir
                .clone()
                .unwrap_or_else(|| base.join(PARAMS_RELATIVE)),
            settings_file: overrides.settings_file.clone().unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| base.clone())
                    .join(SETTINGS_FILE)
            }),
        }
    }

    /// All paths rooted under one directory. Handy for tests and portable installs.
    pub fn under(root: &Path) -> Self {
        Self {
            conf_file: root.join("THC.conf"),
            params_dir: root.join("params"),
            settings_file: root.join("settings.toml"),
        }
    }

    /// Directory containing the conf file.
    pub fn conf_dir(&self) -> Option<&Path> {
        self.conf_file.parent()
    }
}

/// Home directory on Unix, roaming app-data on Windows.
fn platform_base_dir() -> PathBuf {
    #[cfg(windows)]
    let base = dirs::data_dir();
    #[cfg(not(windows))]
    let base = dirs::home_dir();

    base.unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_overrides_win() {
        let overrides = PathsConfig {
            conf_file: Some(PathBuf::from("/srv/thc/THC.conf")),
            params_dir: Some(PathBuf::from("/srv/params")),
            settings_file: Some(PathBuf::from("/srv/settings.toml")),
        };
        let paths = DaemonPaths::resolve(&overrides);
        assert_eq!(paths.conf_file, PathBuf::from("/srv/thc/THC.conf"));
        assert_eq!(paths.params_dir, PathBuf::from("/srv/params"));
        assert_eq!(paths.conf_dir(), Some(Path::new("/srv/thc")));
    }

    #[test]
    fn test_platform_defaults() {
        let paths = DaemonPaths::resolve(&PathsConfig::default());
        assert!(paths.conf_file.ends_with("THC.conf"));
        assert!(paths.conf_file.to_string_lossy().contains("THC"));
        assert!(paths.settings_file.ends_with("settings.toml"));
    }

    #[test]
    fn test_under_root() {
        let paths = DaemonPaths::under(Path::new("/tmp/x"));
        assert_eq!(paths.params_dir, PathBuf::from("/tmp/x/params"));
    }
}
