//! Daemon conf file: discovery parsing, generation, and line editing.
//!
//! The conf format is one `key=value` pair per line with no sections. Keys
//! are matched case-insensitively after trimming; values are trimmed. Lines
//! with unknown keys (including `#` comments) are ignored.

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::connection::{ConfigSource, ConnectionConfig, LOOPBACK_HOST, RpcPassword};

/// RPC port used when the conf file sets neither `rpcport` nor `testnet=1`.
pub const MAINNET_RPC_PORT: u16 = 36790;

/// RPC port implied by `testnet=1` when no `rpcport` was set before it.
pub const TESTNET_RPC_PORT: u16 = 18232;

/// RPC user written into generated conf files.
pub const GENERATED_RPC_USER: &str = "thc";

/// Length of the generated RPC password.
pub const GENERATED_PASSWORD_LEN: usize = 10;

/// SOCKS proxy written when the user asks to route the daemon through Tor.
pub const TOR_PROXY: &str = "127.0.0.1:9050";

/// Errors from reading or writing the daemon conf file.
#[derive(Debug, thiserror::Error)]
pub enum ConfError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} exists but is not a readable conf file")]
    Unreadable { path: PathBuf },
}

/// Choices made when generating a fresh conf file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewConfOptions {
    /// Custom `datadir=` for the daemon's block data.
    pub datadir: Option<PathBuf>,
    /// Route the daemon's peer traffic through a local Tor proxy.
    pub use_tor: bool,
}

/// Split a conf line into a lowercase key and trimmed value.
///
/// Lines without `=` yield the whole trimmed line as key and an empty value,
/// which never matches a recognised key.
fn split_line(line: &str) -> (String, &str) {
    match line.split_once('=') {
        Some((key, value)) => (key.trim().to_lowercase(), value.trim()),
        None => (line.trim().to_lowercase(), ""),
    }
}

/// Parse conf file contents into a connection config.
///
/// `conf_path` is the file the contents came from; its directory is recorded
/// on the config.
pub fn parse_conf(contents: &str, conf_path: &Path) -> ConnectionConfig {
    let mut rpc_user = String::new();
    let mut rpc_password = String::new();
    let mut port: Option<u16> = None;
    let mut daemon_detached = false;
    let mut proxy = None;

    for line in contents.lines() {
        let (key, value) = split_line(line);
        match key.as_str() {
            "rpcuser" => rpc_user = value.to_string(),
            "rpcpassword" => rpc_password = value.to_string(),
            "rpcport" => match value.parse::<u16>() {
                Ok(p) => port = Some(p),
                Err(_) => warn!(value, "Ignoring unparseable rpcport"),
            },
            "daemon" if value == "1" => daemon_detached = true,
            "proxy" => proxy = Some(value.to_string()),
            "testnet" if value == "1" && port.is_none() => port = Some(TESTNET_RPC_PORT),
            _ => {}
        }
    }

    ConnectionConfig {
        host: LOOPBACK_HOST.to_string(),
        port: port.unwrap_or(MAINNET_RPC_PORT),
        rpc_user,
        rpc_password: RpcPassword::new(rpc_password),
        proxy,
        uses_conf_file: true,
        daemon_detached,
        conf_dir: conf_path.parent().map(Path::to_path_buf),
        source: ConfigSource::DiscoveredConf,
    }
}

/// Read and parse the conf file at `path`.
pub fn read_conf(path: &Path) -> Result<ConnectionConfig, ConfError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Found daemon conf");
    Ok(parse_conf(&contents, path))
}

/// Random alphanumeric RPC password for generated conf files.
pub fn generate_rpc_password() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Render the generated conf template.
pub fn render_conf_template(password: &str, options: &NewConfOptions) -> String {
    let mut out = String::new();
    out.push_str("# Autogenerated by HempPAY\n");
    out.push_str("server=1\n");
    out.push_str(&format!("rpcuser={GENERATED_RPC_USER}\n"));
    out.push_str(&format!("rpcpassword={password}\n"));
    out.push_str(&format!("rpcport={MAINNET_RPC_PORT}\n"));
    out.push_str("txindex=1\n");
    out.push_str("addressindex=1\n");
    out.push_str("spentindex=1\n");
    out.push_str("timestampindex=1\n");
    out.push_str("rpcworkqueue=256\n");
    out.push_str("rpcallowip=127.0.0.1\n");

    if let Some(datadir) = &options.datadir {
        out.push_str(&format!("datadir={}\n", datadir.display()));
    }
    if options.use_tor {
        out.push_str(&format!("proxy={TOR_PROXY}\n"));
    }
    out
}

/// Write a brand-new conf file at `path`, creating parent directories.
///
/// Any existing file is truncated.
pub fn create_conf(path: &Path, options: &NewConfOptions) -> Result<(), ConfError> {
    info!(path = %path.display(), "Creating daemon conf");
    let write_err = |source| ConfError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let contents = render_conf_template(&generate_rpc_password(), options);
    std::fs::write(path, contents).map_err(write_err)
}

/// Append a single line to the conf file.
pub fn append_conf_line(path: &Path, line: &str) -> Result<(), ConfError> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ConfError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    writeln!(file, "{line}").map_err(|source| ConfError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), line, "Appended conf line");
    Ok(())
}

/// Rewrite the conf file without any line whose key is `option`.
///
/// Returns how many lines were dropped.
pub fn remove_conf_option(path: &Path, option: &str) -> Result<usize, ConfError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let option = option.trim().to_lowercase();
    let mut kept = String::with_capacity(contents.len());
    let mut removed = 0;
    for line in contents.lines() {
        if split_line(line).0 == option {
            removed += 1;
        } else {
            kept.push_str(line);
            kept.push('\n');
        }
    }

    std::fs::write(path, kept).map_err(|source| ConfError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), option, removed, "Removed conf option");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn parse(contents: &str) -> ConnectionConfig {
        parse_conf(contents, Path::new("/home/u/.komodo/THC/THC.conf"))
    }

    #[test]
    fn test_testnet_port_default() {
        let config = parse("rpcuser=alice\nrpcpassword=secret\ntestnet=1\n");
        assert_eq!(config.rpc_user, "alice");
        assert_eq!(config.rpc_password.expose(), "secret");
        assert_eq!(config.port, TESTNET_RPC_PORT);
    }

    #[test]
    fn test_mainnet_port_default() {
        let config = parse("rpcuser=alice\nrpcpassword=secret\n");
        assert_eq!(config.port, MAINNET_RPC_PORT);
    }

    #[test]
    fn test_explicit_port_beats_testnet() {
        let config = parse("rpcport=1234\ntestnet=1\n");
        assert_eq!(config.port, 1234);
    }

    #[test]
    fn test_rpcport_after_testnet_overrides() {
        let config = parse("testnet=1\nrpcport=4321\n");
        assert_eq!(config.port, 4321);
    }

    #[test]
    fn test_keys_case_insensitive_and_trimmed() {
        let config = parse("  RPCUser = bob \nRpcPassword=  pw  \nDAEMON=1\nproxy= 127.0.0.1:9050\n");
        assert_eq!(config.rpc_user, "bob");
        assert_eq!(config.rpc_password.expose(), "pw");
        assert!(config.daemon_detached);
        assert_eq!(config.proxy.as_deref(), Some("127.0.0.1:9050"));
    }

    #[test]
    fn test_comments_and_unknown_keys_ignored() {
        let config = parse("# rpcuser=commented\nrpcuser=real\ntxindex=1\ngarbage line\n");
        assert_eq!(config.rpc_user, "real");
        assert!(!config.daemon_detached);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let config = parse("rpcpassword=abc=def\n");
        assert_eq!(config.rpc_password.expose(), "abc=def");
    }

    #[test]
    fn test_discovered_config_shape() {
        let config = parse("daemon=0\n");
        assert_eq!(config.host, LOOPBACK_HOST);
        assert!(config.uses_conf_file);
        assert!(!config.daemon_detached);
        assert_eq!(config.source, ConfigSource::DiscoveredConf);
        assert_eq!(
            config.conf_dir.as_deref(),
            Some(Path::new("/home/u/.komodo/THC"))
        );
    }

    #[test]
    fn test_bad_port_falls_back() {
        let config = parse("rpcport=notaport\n");
        assert_eq!(config.port, MAINNET_RPC_PORT);
    }

    #[test]
    fn test_generated_password() {
        let pw = generate_rpc_password();
        assert_eq!(pw.len(), GENERATED_PASSWORD_LEN);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_template_minimal() {
        let text = render_conf_template("abcdefghij", &NewConfOptions::default());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "# Autogenerated by HempPAY",
                "server=1",
                "rpcuser=thc",
                "rpcpassword=abcdefghij",
                "rpcport=36790",
                "txindex=1",
                "addressindex=1",
                "spentindex=1",
                "timestampindex=1",
                "rpcworkqueue=256",
                "rpcallowip=127.0.0.1",
            ]
        );
    }

    #[test]
    fn test_template_with_datadir_and_tor() {
        let options = NewConfOptions {
            datadir: Some(PathBuf::from("/data/thc")),
            use_tor: true,
        };
        let text = render_conf_template("pw", &options);
        assert!(text.contains("datadir=/data/thc\n"));
        assert!(text.ends_with("proxy=127.0.0.1:9050\n"));
    }

    #[test]
    fn test_create_conf_roundtrips_through_parser() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/THC.conf");
        create_conf(&path, &NewConfOptions::default()).unwrap();

        let config = read_conf(&path).unwrap();
        assert_eq!(config.rpc_user, GENERATED_RPC_USER);
        assert_eq!(config.rpc_password.expose().len(), GENERATED_PASSWORD_LEN);
        assert_eq!(config.port, MAINNET_RPC_PORT);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_create_conf_fails_when_parent_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let result = create_conf(&blocker.join("THC.conf"), &NewConfOptions::default());
        assert!(matches!(result, Err(ConfError::Write { .. })));
    }

    #[test]
    fn test_read_missing_conf() {
        let result = read_conf(Path::new("/nonexistent/THC.conf"));
        assert!(matches!(result, Err(ConfError::Read { .. })));
    }

    #[test]
    fn test_append_and_remove_option() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("THC.conf");
        std::fs::write(&path, "rpcuser=a\ndaemon=1\nrpcpassword=b\n").unwrap();

        append_conf_line(&path, "Daemon=1").unwrap();
        let removed = remove_conf_option(&path, "daemon").unwrap();
        assert_eq!(removed, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "rpcuser=a\nrpcpassword=b\n");
        assert!(!read_conf(&path).unwrap().daemon_detached);
    }
}
