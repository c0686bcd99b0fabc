//! User-facing status and error reporting.
//!
//! The bootstrap never talks to a UI directly. It reports through a
//! [`Reporter`], which wraps whatever [`StatusSink`] the front end provides
//! (the CLI writes to stderr; a GUI would update a splash screen).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::params::{DownloadProgress, DownloadSummary, ProgressSink};

/// Consecutive rescan updates tolerated before the long-rescan warning.
pub const RESCAN_WARN_AFTER: u32 = 10;

/// Appended to rescan status lines once the rescan has dragged on.
pub const RESCAN_WARNING: &str = "This may take several hours, grab some popcorn";

/// Reported once every parameter file is in place.
pub const DOWNLOADS_FINISHED: &str = "All Downloads Finished Successfully!";

/// Where status lines and error reports end up.
pub trait StatusSink: Send + Sync {
    /// Update the status display.
    fn show_status(&self, info: &str, detail: &str);

    /// Show an error. Returns once the user has seen it (e.g. a dialog closed).
    fn show_error(&self, title: &str, explanation: &str);
}

/// Guard against stacking error reports.
///
/// While one report is being shown, further reports are dropped. The latch
/// resets when the sink returns.
#[derive(Debug, Default)]
pub struct ErrorLatch {
    showing: AtomicBool,
}

struct LatchGuard<'a>(&'a AtomicBool);

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `show` unless another report is in progress. Returns whether it ran.
    pub fn show(&self, show: impl FnOnce()) -> bool {
        if self
            .showing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _guard = LatchGuard(&self.showing);
        show();
        true
    }

    pub fn is_showing(&self) -> bool {
        self.showing.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct RescanState {
    consecutive: u32,
    warned: bool,
}

/// Status and error reporting on top of a [`StatusSink`].
pub struct Reporter {
    sink: Arc<dyn StatusSink>,
    latch: ErrorLatch,
    rescan: Mutex<RescanState>,
}

impl Reporter {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            sink,
            latch: ErrorLatch::new(),
            rescan: Mutex::new(RescanState::default()),
        }
    }

    /// Show a status line.
    ///
    /// Details starting with "rescan" are counted; once more than
    /// [`RESCAN_WARN_AFTER`] arrive back to back, [`RESCAN_WARNING`] is
    /// appended. Logging stops at that point so a long rescan doesn't flood
    /// the log.
    pub fn status(&self, info: &str, detail: &str) {
        let (consecutive, warn_now) = {
            let mut state = self.rescan.lock().unwrap_or_else(PoisonError::into_inner);
            if is_rescan(detail) {
                state.consecutive = state.consecutive.saturating_add(1);
            } else {
                state.consecutive = 0;
            }
            let warn_now = state.consecutive > RESCAN_WARN_AFTER && !state.warned;
            if warn_now {
                state.warned = true;
            }
            (state.consecutive, warn_now)
        };

        if warn_now {
            warn!(updates = consecutive, "Rescan is taking a long time");
        }
        if consecutive < RESCAN_WARN_AFTER {
            info!(status = info, detail, "Status");
        }

        if consecutive > RESCAN_WARN_AFTER {
            let detail = format!("{detail}\n{RESCAN_WARNING}");
            self.sink.show_status(info, &detail);
        } else {
            self.sink.show_status(info, detail);
        }
    }

    /// Report an error through the latch. Returns whether it was shown.
    pub fn error(&self, title: &str, explanation: &str) -> bool {
        let shown = self.latch.show(|| {
            warn!(title, explanation, "Reporting error");
            self.sink.show_error(title, explanation);
        });
        if !shown {
            warn!(title, "Error report suppressed, another is already showing");
        }
        shown
    }

    pub fn latch(&self) -> &ErrorLatch {
        &self.latch
    }
}

fn is_rescan(detail: &str) -> bool {
    detail
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("rescan"))
}

impl ProgressSink for Reporter {
    fn on_progress(&self, progress: &DownloadProgress) {
        self.sink.show_status(&progress.info(), &progress.detail());
    }

    fn on_complete(&self, summary: &DownloadSummary) {
        info!(
            downloaded = summary.downloaded.len(),
            skipped = summary.skipped.len(),
            bytes = summary.bytes,
            "Params ready"
        );
        self.status(DOWNLOADS_FINISHED, "");
    }
}
