#![deny(unsafe_code)]

//! hempconnect CLI: bootstrap a daemon connection and manage the files it
//! depends on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hempconnect_config::conf::{self, NewConfOptions};
use hempconnect_config::settings::{FileSettingsStore, Settings, StoredConnection};
use hempconnect_config::{AppConfig, ConfigResolver, FileConfigResolver};
use hempconnect_core::bootstrap::{BootstrapError, BootstrapTimings};
use hempconnect_core::params::{DownloadProgress, DownloadSummary, ProgressSink};
use hempconnect_core::{
    Bootstrap, HttpConnector, ParamFetcher, ProcessSupervisor, Reporter, RpcRequest, StatusSink,
    build_info,
};

/// hempconnect: connect to a THC daemon, launching it if needed.
#[derive(Parser)]
#[command(name = "hempconnect", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "hempconnect.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap a connection to the daemon and print `getinfo`.
    Connect {
        /// Never launch the embedded daemon.
        #[arg(long)]
        no_embedded: bool,
    },

    /// Check or download the cryptographic parameter files.
    Params {
        #[command(subcommand)]
        action: ParamsAction,
    },

    /// Inspect or edit the daemon conf file.
    Conf {
        #[command(subcommand)]
        action: ConfAction,
    },

    /// Edit persisted user settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[derive(Subcommand)]
enum ParamsAction {
    /// List missing parameter files.
    Check,
    /// Download missing parameter files.
    Fetch,
}

#[derive(Subcommand)]
enum ConfAction {
    /// Print the discovered connection config.
    Show,
    /// Write a new conf file with a random RPC password.
    Create {
        /// Custom data directory for the daemon.
        #[arg(long)]
        datadir: Option<PathBuf>,
        /// Route peer traffic through a local Tor proxy.
        #[arg(long)]
        tor: bool,
    },
    /// Append an option, e.g. `rescan=1`.
    Set { option: String },
    /// Remove every line setting an option.
    Unset { key: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Save host, port, and credentials for a manually managed daemon.
    SetConnection {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = conf::MAINNET_RPC_PORT)]
        port: u16,
        #[arg(long)]
        user: String,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config))),
        )
        .init();

    info!(version = %build_info::version_string(), "hempconnect starting");

    match cli.command {
        Commands::Connect { no_embedded } => cmd_connect(&config, no_embedded).await?,
        Commands::Params { action } => cmd_params(&config, action).await?,
        Commands::Conf { action } => cmd_conf(&config, action)?,
        Commands::Settings { action } => cmd_settings(&config, action)?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// `-v` wins over the config file's level.
fn log_filter(verbose: u8, config: &AppConfig) -> String {
    match verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Prints status to stderr so stdout stays clean for results.
struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn show_status(&self, info: &str, detail: &str) {
        if detail.is_empty() {
            eprintln!("{info}");
        } else {
            eprintln!("{info}: {detail}");
        }
    }

    fn show_error(&self, title: &str, explanation: &str) {
        eprintln!("\n{title}\n\n{explanation}\n");
    }
}

/// Progress lines for `params fetch`, which runs without a bootstrap.
struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, progress: &DownloadProgress) {
        eprintln!("{}: {}", progress.info(), progress.detail());
    }

    fn on_complete(&self, summary: &DownloadSummary) {
        eprintln!(
            "Downloaded {} file(s), {} already present",
            summary.downloaded.len(),
            summary.skipped.len()
        );
    }
}

fn settings_store(config: &AppConfig) -> Result<Arc<FileSettingsStore>> {
    let path = config.daemon_paths().settings_file;
    let store = FileSettingsStore::open(&path)
        .with_context(|| format!("opening settings at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn embedded_supervisor(config: &AppConfig) -> Result<ProcessSupervisor> {
    if let Some(binary) = &config.daemon.binary {
        return Ok(ProcessSupervisor::new(binary));
    }
    let exe = std::env::current_exe().context("locating the hempconnect executable")?;
    let dir = exe
        .parent()
        .context("hempconnect executable has no parent directory")?;
    Ok(ProcessSupervisor::in_app_dir(dir, &config.daemon.name))
}

async fn cmd_connect(config: &AppConfig, no_embedded: bool) -> Result<()> {
    let paths = config.daemon_paths();
    let reporter = Arc::new(Reporter::new(Arc::new(ConsoleStatus)));
    let resolver = FileConfigResolver::new(paths.clone(), settings_store(config)?);

    let mut bootstrap = Bootstrap::new(
        Arc::new(ParamFetcher::new(&paths.params_dir)?),
        Arc::new(resolver),
        Arc::new(HttpConnector::new(config.rpc.timeout())),
        reporter,
    )
    .with_daemon_name(config.daemon.name.clone())
    .with_timings(BootstrapTimings::from(&config.bootstrap));

    if config.daemon.embedded && !no_embedded {
        bootstrap = bootstrap.with_embedded(Box::new(embedded_supervisor(config)?));
    }

    // The reporter has already shown the full explanation.
    let established = bootstrap.run().await.map_err(bootstrap_failed)?;

    let info = established
        .connection
        .call(&RpcRequest::new("hempconnect", "getinfo"))
        .await
        .context("connection shut down before getinfo completed")??;
    println!("{}", serde_json::to_string_pretty(&info)?);

    established.connection.shutdown();
    if established.process.is_some() {
        info!(daemon = %config.daemon.name, "Leaving embedded daemon running");
    }
    Ok(())
}

fn bootstrap_failed(err: BootstrapError) -> anyhow::Error {
    anyhow::anyhow!("bootstrap failed: {err}")
}

async fn cmd_params(config: &AppConfig, action: ParamsAction) -> Result<()> {
    let fetcher = ParamFetcher::new(config.daemon_paths().params_dir)?;
    match action {
        ParamsAction::Check => {
            let missing = fetcher.missing();
            if missing.is_empty() {
                println!("All parameter files present in {}", fetcher.params_dir().display());
            } else {
                for name in missing {
                    println!("missing: {name}");
                }
            }
        }
        ParamsAction::Fetch => {
            fetcher.download_missing(&ConsoleProgress).await?;
        }
    }
    Ok(())
}

/// Split `key=value`, rejecting an empty key.
fn parse_option(option: &str) -> Result<(&str, &str)> {
    match option.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => bail!("expected KEY=VALUE, got {option:?}"),
    }
}

fn cmd_conf(config: &AppConfig, action: ConfAction) -> Result<()> {
    let paths = config.daemon_paths();
    match action {
        ConfAction::Show => {
            let resolver = FileConfigResolver::new(paths.clone(), settings_store(config)?);
            match resolver.discover() {
                Some(connection) => println!("{connection:#?}"),
                None => bail!("no readable conf at {}", paths.conf_file.display()),
            }
        }
        ConfAction::Create { datadir, tor } => {
            if paths.conf_file.exists() {
                bail!("{} already exists", paths.conf_file.display());
            }
            let options = NewConfOptions {
                datadir,
                use_tor: tor,
            };
            conf::create_conf(&paths.conf_file, &options)?;
            println!("Created {}", paths.conf_file.display());
        }
        ConfAction::Set { option } => {
            let (key, value) = parse_option(&option)?;
            conf::append_conf_line(&paths.conf_file, &format!("{key}={value}"))?;
        }
        ConfAction::Unset { key } => {
            let removed = conf::remove_conf_option(&paths.conf_file, &key)?;
            println!("Removed {removed} line(s)");
        }
    }
    Ok(())
}

fn cmd_settings(config: &AppConfig, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::SetConnection {
            host,
            port,
            user,
            password,
        } => {
            let store = settings_store(config)?;
            Settings::new(store.as_ref()).save_connection(&StoredConnection {
                host,
                port: port.to_string(),
                rpc_user: user,
                rpc_password: password,
            })?;
            println!("Saved connection settings to {}", store.path().display());
        }
    }
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}
