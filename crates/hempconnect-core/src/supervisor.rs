//! Embedded daemon process supervision.
//!
//! The supervisor launches the bundled daemon at most once per lifetime and
//! keeps its stderr around for diagnostics. It never restarts or kills the
//! daemon: a daemon launched here keeps running after the supervisor is
//! dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A daemon the bootstrap may launch.
pub trait DaemonProcess: Send {
    /// Launch the daemon unless it was already launched.
    ///
    /// Returns whether the daemon is running afterwards. Calling this again
    /// after a launch never spawns a second process.
    fn start(&mut self) -> bool;

    fn is_running(&self) -> bool;

    /// Everything the daemon has written to stderr so far.
    fn stderr_output(&self) -> String;
}

/// Lifecycle of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    /// Exit code, `None` when killed by a signal or never spawned.
    Exited(Option<i32>),
}

/// Launches and watches the embedded daemon binary.
pub struct ProcessSupervisor {
    program: PathBuf,
    working_dir: Option<PathBuf>,
    state: Arc<Mutex<ProcessState>>,
    stderr: Arc<Mutex<String>>,
    launched: bool,
    launch_count: u32,
}

impl ProcessSupervisor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            stderr: Arc::new(Mutex::new(String::new())),
            launched: false,
            launch_count: 0,
        }
    }

    /// The daemon named `name` shipped next to the application in `dir`.
    ///
    /// On Windows the launcher is `<name>.bat` and runs from `dir`.
    pub fn in_app_dir(dir: &Path, name: &str) -> Self {
        #[cfg(windows)]
        {
            let mut supervisor = Self::new(dir.join(format!("{name}.bat")));
            supervisor.working_dir = Some(dir.to_path_buf());
            supervisor
        }
        #[cfg(not(windows))]
        {
            Self::new(dir.join(name))
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How many processes this supervisor has actually spawned (0 or 1).
    pub fn launch_count(&self) -> u32 {
        self.launch_count
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn spawn(&mut self) -> bool {
        self.launched = true;
        self.set_state(ProcessState::Starting);

        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program.display(), error = %e, "Failed to launch daemon");
                self.stderr
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_str(&format!("failed to launch {}: {e}\n", self.program.display()));
                self.set_state(ProcessState::Exited(None));
                return false;
            }
        };

        self.launch_count += 1;
        self.set_state(ProcessState::Running);
        info!(program = %self.program.display(), pid = ?child.id(), "Launched embedded daemon");

        if let Some(stderr) = child.stderr.take() {
            let sink = Arc::clone(&self.stderr);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut chunk = Vec::new();
                loop {
                    chunk.clear();
                    match reader.read_until(b'\n', &mut chunk).await {
                        Ok(0) => break,
                        Ok(_) => {
                            // Raw bytes; the daemon is not obliged to write UTF-8.
                            let text = String::from_utf8_lossy(&chunk);
                            debug!(target: "daemon_stderr", "{}", text.trim_end());
                            sink.lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push_str(&text);
                        }
                        Err(e) => {
                            warn!(error = %e, "Stopped reading daemon stderr");
                            break;
                        }
                    }
                }
            });
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(error = %e, "Failed to wait on embedded daemon");
                    None
                }
            };
            info!(code = ?code, "Embedded daemon exited");
            *state.lock().unwrap_or_else(PoisonError::into_inner) = ProcessState::Exited(code);
        });

        true
    }
}

impl DaemonProcess for ProcessSupervisor {
    fn start(&mut self) -> bool {
        if self.launched {
            let running = self.is_running();
            debug!(running, "Embedded daemon already launched");
            return running;
        }
        if !self.program.is_file() {
            warn!(program = %self.program.display(), "Embedded daemon binary not found");
            return false;
        }
        self.spawn()
    }

    fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ProcessState::Starting | ProcessState::Running
        )
    }

    fn stderr_output(&self) -> String {
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
