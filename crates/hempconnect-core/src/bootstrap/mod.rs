//! Connection bootstrap.
//!
//! Gets from "nothing known" to an established daemon connection:
//!
//! ```text
//! CheckingParams -> DownloadingParams -> CheckingParams
//!      |
//! ResolvingConfig -> CreatingConfig -> CheckingParams
//!      |
//! Probing --ok--> Connected
//!   |  |  \--auth--> AuthFailed
//!   |  \--warming up--> ServerStarting --poll--> Probing
//!   \--refused--> Refused -> LaunchingEmbedded --wait--> Probing
//! ```
//!
//! Every step is one call to [`Bootstrap::advance`], which maps a state to
//! the next state, a timed wait before the next state, or the final result.
//! [`Bootstrap::run`] drives it to completion. Collaborators sit behind
//! traits so the whole machine can be exercised with scripted fakes.

mod error;

pub use error::BootstrapError;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use hempconnect_config::{
    BootstrapConfig, ConfError, ConfigResolution, ConfigResolver, ConnectionConfig,
    NewConfOptions, resolve,
};

use crate::params::ParamsProvider;
use crate::rpc::{Connection, HttpTransport, RpcError, RpcRequest};
use crate::status::Reporter;
use crate::supervisor::DaemonProcess;

/// Request id used for the `getinfo` probe.
pub const PROBE_ID: &str = "someid";

/// Delays and bounds for one bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapTimings {
    /// Between polls while the daemon is warming up.
    pub poll_interval: Duration,
    /// After the first successful probe, before handing off.
    pub connected_grace: Duration,
    /// After the embedded daemon was started (or found running).
    pub launch_wait: Duration,
    /// For a `daemon=1` daemon that forked into the background.
    pub detached_wait: Duration,
    /// Before the last probe after a failed launch.
    pub last_resort_wait: Duration,
    /// Refused probes tolerated while the embedded daemon runs.
    pub max_launch_waits: u32,
}

impl Default for BootstrapTimings {
    fn default() -> Self {
        Self::from(&BootstrapConfig::default())
    }
}

impl From<&BootstrapConfig> for BootstrapTimings {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            connected_grace: Duration::from_millis(config.connected_grace_ms),
            launch_wait: Duration::from_millis(config.launch_wait_ms),
            detached_wait: Duration::from_millis(config.detached_wait_ms),
            last_resort_wait: Duration::from_millis(config.last_resort_wait_ms),
            max_launch_waits: config.max_launch_waits,
        }
    }
}

/// Opens a [`Connection`] for a config.
pub trait Connector: Send + Sync {
    fn connect(&self, config: Arc<ConnectionConfig>) -> Result<Connection, RpcError>;
}

/// Connector producing HTTP connections.
pub struct HttpConnector {
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, config: Arc<ConnectionConfig>) -> Result<Connection, RpcError> {
        let transport = HttpTransport::new(&config, self.timeout)?;
        Ok(Connection::new(Arc::new(transport), config))
    }
}

/// A config being probed, and whether a refusal may still launch the
/// embedded daemon.
#[derive(Debug, Clone)]
pub struct Probe {
    pub config: Arc<ConnectionConfig>,
    pub launch_allowed: bool,
}

impl Probe {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
            launch_allowed: true,
        }
    }

    fn forbid_launch(self) -> Self {
        Self {
            launch_allowed: false,
            ..self
        }
    }
}

#[derive(Debug)]
pub enum State {
    CheckingParams,
    DownloadingParams,
    ResolvingConfig,
    CreatingConfig,
    Probing(Probe),
    Refused(Probe),
    LaunchingEmbedded(Probe),
    ServerStarting { probe: Probe, message: String },
    Connected(Connection),
    AuthFailed,
    Failed(BootstrapError),
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::CheckingParams => "CheckingParams",
            State::DownloadingParams => "DownloadingParams",
            State::ResolvingConfig => "ResolvingConfig",
            State::CreatingConfig => "CreatingConfig",
            State::Probing(_) => "Probing",
            State::Refused(_) => "Refused",
            State::LaunchingEmbedded(_) => "LaunchingEmbedded",
            State::ServerStarting { .. } => "ServerStarting",
            State::Connected(_) => "Connected",
            State::AuthFailed => "AuthFailed",
            State::Failed(_) => "Failed",
        }
    }
}

/// Result of one [`Bootstrap::advance`].
#[derive(Debug)]
pub enum Step {
    Next(State),
    After(Duration, State),
    Done(Result<Established, BootstrapError>),
}

/// A live connection, plus the embedded daemon handle when there is one.
pub struct Established {
    pub connection: Connection,
    pub process: Option<Box<dyn DaemonProcess>>,
}

impl fmt::Debug for Established {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Established")
            .field("connection", &self.connection)
            .field("embedded", &self.process.is_some())
            .finish()
    }
}

/// The bootstrap state machine and its collaborators.
pub struct Bootstrap {
    params: Arc<dyn ParamsProvider>,
    resolver: Arc<dyn ConfigResolver>,
    connector: Arc<dyn Connector>,
    reporter: Arc<Reporter>,
    embedded: Option<Box<dyn DaemonProcess>>,
    daemon_name: String,
    new_conf: NewConfOptions,
    timings: BootstrapTimings,

    downloaded: bool,
    created_conf: bool,
    launch_waits: u32,
    dots: usize,
}

impl Bootstrap {
    /// A bootstrap for an externally managed daemon. Use
    /// [`with_embedded`](Self::with_embedded) to allow launching one.
    pub fn new(
        params: Arc<dyn ParamsProvider>,
        resolver: Arc<dyn ConfigResolver>,
        connector: Arc<dyn Connector>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            params,
            resolver,
            connector,
            reporter,
            embedded: None,
            daemon_name: "thcd".to_string(),
            new_conf: NewConfOptions::default(),
            timings: BootstrapTimings::default(),
            downloaded: false,
            created_conf: false,
            launch_waits: 0,
            dots: 0,
        }
    }

    /// Enable embedded mode with the given daemon handle.
    pub fn with_embedded(mut self, process: Box<dyn DaemonProcess>) -> Self {
        self.embedded = Some(process);
        self
    }

    pub fn with_daemon_name(mut self, name: impl Into<String>) -> Self {
        self.daemon_name = name.into();
        self
    }

    /// Options for a conf file created in embedded mode.
    pub fn with_new_conf_options(mut self, options: NewConfOptions) -> Self {
        self.new_conf = options;
        self
    }

    pub fn with_timings(mut self, timings: BootstrapTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn uses_embedded(&self) -> bool {
        self.embedded.is_some()
    }

    /// Drive the machine from [`State::CheckingParams`] to a result.
    pub async fn run(mut self) -> Result<Established, BootstrapError> {
        let mut state = State::CheckingParams;
        loop {
            let from = state.name();
            match self.advance(state).await {
                Step::Next(next) => {
                    debug!(from, to = next.name(), "Bootstrap step");
                    state = next;
                }
                Step::After(delay, next) => {
                    debug!(from, to = next.name(), delay_ms = delay.as_millis() as u64, "Bootstrap wait");
                    tokio::time::sleep(delay).await;
                    state = next;
                }
                Step::Done(result) => return result,
            }
        }
    }

    /// Perform one transition.
    pub async fn advance(&mut self, state: State) -> Step {
        match state {
            State::CheckingParams => self.check_params(),
            State::DownloadingParams => self.download_params().await,
            State::ResolvingConfig => self.resolve_config(),
            State::CreatingConfig => self.create_config(),
            State::Probing(probe) => self.probe(probe).await,
            State::Refused(probe) => self.refused(probe),
            State::LaunchingEmbedded(probe) => self.launch(probe),
            State::ServerStarting { probe, message } => self.server_starting(probe, &message),
            State::Connected(connection) => {
                info!(
                    host = %connection.config().host,
                    port = connection.config().port,
                    "Connected to daemon"
                );
                Step::Done(Ok(Established {
                    connection,
                    process: self.embedded.take(),
                }))
            }
            State::AuthFailed => self.fail(BootstrapError::AuthenticationFailed),
            State::Failed(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: BootstrapError) -> Step {
        error!(error = %err, "Bootstrap failed");
        self.reporter
            .error(err.title(), &err.explanation(&self.daemon_name));
        Step::Done(Err(err))
    }

    fn check_params(&mut self) -> Step {
        if self.params.ensure_params() {
            return Step::Next(State::ResolvingConfig);
        }
        if self.downloaded {
            return Step::Next(State::Failed(BootstrapError::ParamsMissing));
        }
        Step::Next(State::DownloadingParams)
    }

    async fn download_params(&mut self) -> Step {
        self.reporter.status("Downloading parameters", "");
        let result = self
            .params
            .download_missing(self.reporter.as_ref())
            .await;
        self.downloaded = true;
        match result {
            Ok(_) => Step::Next(State::CheckingParams),
            Err(e) => Step::Next(State::Failed(BootstrapError::DownloadFailed(
                e.to_string(),
            ))),
        }
    }

    fn resolve_config(&mut self) -> Step {
        match resolve(self.resolver.as_ref(), self.uses_embedded()) {
            ConfigResolution::Discovered(config) | ConfigResolution::Manual(Some(config)) => {
                Step::Next(State::Probing(Probe::new(config)))
            }
            ConfigResolution::CreateNew if self.created_conf => {
                Step::Next(State::Failed(BootstrapError::ConfigMissing(
                    "a new conf file was written but could not be found".to_string(),
                )))
            }
            ConfigResolution::CreateNew => Step::Next(State::CreatingConfig),
            ConfigResolution::Manual(None) => Step::Next(State::Failed(
                BootstrapError::ConfigMissing("not configured".to_string()),
            )),
        }
    }

    fn create_config(&mut self) -> Step {
        match self.resolver.create_config(&self.new_conf) {
            Ok(path) => {
                self.created_conf = true;
                self.reporter.status(
                    &format!("Created a new conf for {}", self.daemon_name),
                    &path.display().to_string(),
                );
                Step::Next(State::CheckingParams)
            }
            Err(e @ ConfError::Write { .. }) => {
                Step::Next(State::Failed(BootstrapError::ConfigWrite(e.to_string())))
            }
            Err(e) => Step::Next(State::Failed(BootstrapError::ConfigUnreadable(
                e.to_string(),
            ))),
        }
    }

    async fn probe(&mut self, probe: Probe) -> Step {
        let connection = match self.connector.connect(Arc::clone(&probe.config)) {
            Ok(connection) => connection,
            Err(e) => {
                return Step::Next(State::Failed(BootstrapError::TransportError(
                    e.to_string(),
                )));
            }
        };

        debug!(
            host = %probe.config.host,
            port = probe.config.port,
            launch_allowed = probe.launch_allowed,
            "Probing daemon"
        );
        let reply = connection
            .call(&RpcRequest::new(PROBE_ID, "getinfo"))
            .await;

        match reply {
            Some(Ok(_)) => {
                self.reporter
                    .status(&format!("Connected to {}", self.daemon_name), "");
                Step::After(self.timings.connected_grace, State::Connected(connection))
            }
            Some(Err(RpcError::ConnectionRefused(reason))) => {
                debug!(reason = %reason, "Daemon refused connection");
                Step::Next(State::Refused(probe))
            }
            Some(Err(RpcError::AuthenticationRequired)) => Step::Next(State::AuthFailed),
            Some(Err(err @ RpcError::Daemon { .. })) if err.is_warming_up() => {
                debug!(reason = %err.user_message(), "Daemon is warming up");
                Step::Next(State::ServerStarting {
                    probe,
                    message: err.user_message(),
                })
            }
            Some(Err(err @ RpcError::Daemon { .. })) => Step::Next(State::Failed(
                BootstrapError::TransportError(err.to_string()),
            )),
            Some(Err(RpcError::MalformedResponse(detail))) => Step::Next(State::Failed(
                BootstrapError::MalformedResponse(detail),
            )),
            Some(Err(RpcError::Transport(detail))) => {
                Step::Next(State::Failed(BootstrapError::TransportError(detail)))
            }
            None => Step::Next(State::Failed(BootstrapError::TransportError(
                "connection was shut down".to_string(),
            ))),
        }
    }

    fn server_starting(&mut self, probe: Probe, message: &str) -> Step {
        let detail = format!("{}{}", strip_ellipsis(message), ".".repeat(self.dots));
        self.dots = (self.dots + 1) % 4;
        self.reporter.status(
            &format!("Your {} is starting up. Please wait.", self.daemon_name),
            &detail,
        );
        Step::After(self.timings.poll_interval, State::Probing(probe))
    }

    fn refused(&mut self, probe: Probe) -> Step {
        if self.embedded.is_none() {
            return Step::Next(State::Failed(BootstrapError::ConnectionRefused {
                host: probe.config.host.clone(),
                port: probe.config.port,
                uses_conf_file: probe.config.uses_conf_file,
            }));
        }
        if probe.launch_allowed {
            return Step::Next(State::LaunchingEmbedded(probe));
        }
        let stderr = self
            .embedded
            .as_ref()
            .map(|process| process.stderr_output())
            .unwrap_or_default();
        Step::Next(State::Failed(BootstrapError::ProcessLaunchFailed {
            detached: probe.config.daemon_detached,
            stderr,
        }))
    }

    fn launch(&mut self, probe: Probe) -> Step {
        let name = self.daemon_name.clone();
        let Some(process) = self.embedded.as_mut() else {
            return Step::Next(State::Refused(probe.forbid_launch()));
        };

        if process.start() {
            self.launch_waits += 1;
            let launch_allowed = self.launch_waits < self.timings.max_launch_waits;
            self.reporter.status(&format!("Starting embedded {name}"), "");
            return Step::After(
                self.timings.launch_wait,
                State::Probing(Probe {
                    launch_allowed,
                    ..probe
                }),
            );
        }

        if probe.config.daemon_detached {
            info!("Daemon is configured with daemon=1, waiting for it to come up");
            self.reporter.status(
                &format!("{name} is set to run as daemon"),
                &format!("Waiting for {name}"),
            );
            return Step::After(
                self.timings.detached_wait,
                State::Probing(probe.forbid_launch()),
            );
        }

        info!("Embedded daemon did not start, probing once more");
        self.reporter.status(&format!("Waiting for {name}"), "");
        Step::After(
            self.timings.last_resort_wait,
            State::Probing(probe.forbid_launch()),
        )
    }
}

/// Drop the trailing three characters (the daemon's own "...").
///
/// Messages shorter than three characters are kept whole.
fn strip_ellipsis(message: &str) -> &str {
    match message.char_indices().rev().nth(2) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strip_ellipsis() {
        assert_eq!(strip_ellipsis("Loading block index..."), "Loading block index");
        assert_eq!(strip_ellipsis("abc"), "");
        assert_eq!(strip_ellipsis("ab"), "ab");
        assert_eq!(strip_ellipsis(""), "");
        assert_eq!(strip_ellipsis("Rescanning…xyz"), "Rescanning…");
    }

    #[test]
    fn test_timings_from_config() {
        let timings = BootstrapTimings::default();
        assert_eq!(timings.poll_interval, Duration::from_secs(1));
        assert_eq!(timings.connected_grace, Duration::from_secs(2));
        assert_eq!(timings.launch_wait, Duration::from_secs(1));
        assert_eq!(timings.detached_wait, Duration::from_secs(5));
        assert_eq!(timings.last_resort_wait, Duration::from_secs(2));
    }

    #[test]
    fn test_probe_forbid_launch_keeps_config() {
        let config = ConnectionConfig::user_settings("127.0.0.1", 1, "u", "p");
        let probe = Probe::new(config.clone());
        assert!(probe.launch_allowed);
        let forbidden = probe.forbid_launch();
        assert!(!forbidden.launch_allowed);
        assert_eq!(*forbidden.config, config);
    }
}
