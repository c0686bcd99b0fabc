//! Scripted stand-ins for the bootstrap's collaborators.
//!
//! Each fake records what happened to it so tests can assert on call counts
//! after the bootstrap has consumed its handles.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use hempconnect_config::{ConfError, ConfigResolver, ConnectionConfig, NewConfOptions};
use hempconnect_core::BoxFuture;
use hempconnect_core::bootstrap::Connector;
use hempconnect_core::params::{
    DownloadSummary, ParamsError, ParamsProvider, ProgressSink, REQUIRED_PARAMS,
};
use hempconnect_core::rpc::{Connection, RpcError, RpcRequest, RpcTransport};
use hempconnect_core::status::StatusSink;
use hempconnect_core::supervisor::DaemonProcess;

/// A successful `getinfo` reply.
pub fn getinfo_ok() -> Result<Value, RpcError> {
    Ok(json!({"version": 3000000, "blocks": 1042, "connections": 8}))
}

/// Nothing listening on the RPC port.
pub fn refused() -> Result<Value, RpcError> {
    Err(RpcError::ConnectionRefused("Connection refused (os error 111)".into()))
}

/// HTTP 500 with a JSON error while the daemon loads.
pub fn warming_up(message: &str) -> Result<Value, RpcError> {
    Err(RpcError::Daemon {
        status: 500,
        code: -28,
        message: message.to_string(),
    })
}

/// A JSON error under some status other than 500.
pub fn daemon_error(status: u16, code: i64, message: &str) -> Result<Value, RpcError> {
    Err(RpcError::Daemon {
        status,
        code,
        message: message.to_string(),
    })
}

/// Transport that replays a fixed list of replies, one per request.
///
/// Once the script runs out every request fails with a transport error.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<Value, RpcError>>>,
    requests: Mutex<Vec<RpcRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Result<Value, RpcError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RpcRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

impl RpcTransport for ScriptedTransport {
    fn post(&self, request: &RpcRequest) -> BoxFuture<'_, Result<Value, RpcError>> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RpcError::Transport("script exhausted".into())));
        Box::pin(async move { reply })
    }
}

/// Connector handing out connections over one shared [`ScriptedTransport`].
pub struct ScriptedConnector {
    transport: Arc<ScriptedTransport>,
    configs: Mutex<Vec<Arc<ConnectionConfig>>>,
}

impl ScriptedConnector {
    pub fn new(transport: Arc<ScriptedTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            configs: Mutex::new(Vec::new()),
        })
    }

    /// Configs passed to `connect`, in order.
    pub fn configs(&self) -> Vec<Arc<ConnectionConfig>> {
        self.configs.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, config: Arc<ConnectionConfig>) -> Result<Connection, RpcError> {
        self.configs.lock().unwrap().push(Arc::clone(&config));
        let transport: Arc<dyn RpcTransport> = self.transport.clone();
        Ok(Connection::new(transport, config))
    }
}

/// Counters shared between a [`FakeDaemonProcess`] and the test.
#[derive(Debug, Clone, Default)]
pub struct FakeDaemonCounters {
    spawns: Arc<AtomicUsize>,
    start_calls: Arc<AtomicUsize>,
}

impl FakeDaemonCounters {
    /// Processes actually "launched".
    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }
}

/// In-memory [`DaemonProcess`] with the same launch-once semantics as the
/// real supervisor.
pub struct FakeDaemonProcess {
    can_launch: bool,
    launched: bool,
    stderr: String,
    counters: FakeDaemonCounters,
}

impl FakeDaemonProcess {
    /// A daemon whose first `start` succeeds.
    pub fn launches() -> Self {
        Self {
            can_launch: true,
            launched: false,
            stderr: String::new(),
            counters: FakeDaemonCounters::default(),
        }
    }

    /// A daemon that cannot be launched, leaving `stderr` behind.
    pub fn fails_to_launch(stderr: &str) -> Self {
        Self {
            can_launch: false,
            stderr: stderr.to_string(),
            ..Self::launches()
        }
    }

    pub fn counters(&self) -> FakeDaemonCounters {
        self.counters.clone()
    }
}

impl DaemonProcess for FakeDaemonProcess {
    fn start(&mut self) -> bool {
        self.counters.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.launched {
            return true;
        }
        if !self.can_launch {
            return false;
        }
        self.launched = true;
        self.counters.spawns.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn is_running(&self) -> bool {
        self.launched
    }

    fn stderr_output(&self) -> String {
        self.stderr.clone()
    }
}

/// [`StatusSink`] that records everything it is shown.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    statuses: Mutex<Vec<(String, String)>>,
    errors: Mutex<Vec<(String, String)>>,
}

impl RecordingStatusSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<(String, String)> {
        self.statuses.lock().unwrap().clone()
    }

    /// Details of every status whose headline matches `info`.
    pub fn details_for(&self, info: &str) -> Vec<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| i == info)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingStatusSink {
    fn show_status(&self, info: &str, detail: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push((info.to_string(), detail.to_string()));
    }

    fn show_error(&self, title: &str, explanation: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((title.to_string(), explanation.to_string()));
    }
}

/// What [`StaticResolver::create_config`] does.
#[derive(Debug, Clone)]
pub enum CreateBehavior {
    /// The new conf is discoverable afterwards with this content.
    Discoverable(ConnectionConfig),
    /// Writing "succeeds" but discovery still finds nothing.
    Vanishes,
    /// Writing fails.
    Fails,
}

/// [`ConfigResolver`] over fixed values.
pub struct StaticResolver {
    discovered: Mutex<Option<ConnectionConfig>>,
    stored: Option<ConnectionConfig>,
    on_create: CreateBehavior,
    creates: AtomicUsize,
}

impl StaticResolver {
    fn with(discovered: Option<ConnectionConfig>, stored: Option<ConnectionConfig>) -> Self {
        Self {
            discovered: Mutex::new(discovered),
            stored,
            on_create: CreateBehavior::Vanishes,
            creates: AtomicUsize::new(0),
        }
    }

    /// A conf file exists and parses to `config`.
    pub fn discovering(config: ConnectionConfig) -> Self {
        Self::with(Some(config), None)
    }

    /// No conf file; saved settings yield `stored`.
    pub fn stored(stored: Option<ConnectionConfig>) -> Self {
        Self::with(None, stored)
    }

    /// No conf file, nothing saved.
    pub fn empty() -> Self {
        Self::with(None, None)
    }

    pub fn on_create(mut self, behavior: CreateBehavior) -> Self {
        self.on_create = behavior;
        self
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

impl ConfigResolver for StaticResolver {
    fn discover(&self) -> Option<ConnectionConfig> {
        self.discovered.lock().unwrap().clone()
    }

    fn load_from_stored_settings(&self) -> Option<ConnectionConfig> {
        self.stored.clone()
    }

    fn create_config(&self, _options: &NewConfOptions) -> Result<PathBuf, ConfError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let path = PathBuf::from("/tmp/thc/THC.conf");
        match &self.on_create {
            CreateBehavior::Discoverable(config) => {
                *self.discovered.lock().unwrap() = Some(config.clone());
                Ok(path)
            }
            CreateBehavior::Vanishes => Ok(path),
            CreateBehavior::Fails => Err(ConfError::Write {
                path,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            }),
        }
    }
}

/// What [`StaticParams::download_missing`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadBehavior {
    /// All files end up present.
    Completes,
    /// Reports success but files are still missing.
    LeavesMissing,
    /// Fails with an HTTP error.
    Fails,
}

/// [`ParamsProvider`] without a filesystem or network.
pub struct StaticParams {
    present: AtomicBool,
    behavior: DownloadBehavior,
    downloads: AtomicUsize,
}

impl StaticParams {
    pub fn present() -> Arc<Self> {
        Arc::new(Self {
            present: AtomicBool::new(true),
            behavior: DownloadBehavior::Completes,
            downloads: AtomicUsize::new(0),
        })
    }

    pub fn missing(behavior: DownloadBehavior) -> Arc<Self> {
        Arc::new(Self {
            present: AtomicBool::new(false),
            behavior,
            downloads: AtomicUsize::new(0),
        })
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl ParamsProvider for StaticParams {
    fn ensure_params(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn download_missing<'a>(
        &'a self,
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<DownloadSummary, ParamsError>> {
        Box::pin(async move {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                DownloadBehavior::Fails => Err(ParamsError::Status {
                    url: format!("https://z.cash/downloads/{}", REQUIRED_PARAMS[0]),
                    status: 503,
                }),
                behavior => {
                    if behavior == DownloadBehavior::Completes {
                        self.present.store(true, Ordering::SeqCst);
                    }
                    let summary = DownloadSummary {
                        downloaded: REQUIRED_PARAMS.iter().map(|s| s.to_string()).collect(),
                        skipped: Vec::new(),
                        bytes: 0,
                    };
                    progress.on_complete(&summary);
                    Ok(summary)
                }
            }
        })
    }
}
