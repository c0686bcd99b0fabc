//! Cryptographic parameter files the daemon needs before it will start.
//!
//! Files are fetched one at a time into `<name>.part` and renamed into place
//! only after the whole body has been written, so the params directory only
//! ever holds complete files.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::{BoxFuture, build_info};

/// Where the parameter files are published.
pub const PARAMS_BASE_URL: &str = "https://z.cash/downloads";

/// Every file that must be present in the params directory.
pub const REQUIRED_PARAMS: [&str; 5] = [
    "sapling-output.params",
    "sapling-spend.params",
    "sprout-groth16.params",
    "sprout-proving.key",
    "sprout-verifying.key",
];

/// Minimum spacing between progress events for one file.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

const PART_SUFFIX: &str = "part";

/// Errors from fetching parameter files.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("could not create params directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("download of {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("download of {url} failed with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{file_name} is incomplete: expected {expected} bytes, received {received}")]
    Incomplete {
        file_name: String,
        expected: u64,
        received: u64,
    },
}

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadItem {
    pub url: String,
    pub file_name: String,
}

/// Files still to fetch, consumed front to back.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    items: VecDeque<DownloadItem>,
}

impl DownloadQueue {
    pub fn new(base_url: &str, file_names: &[&str]) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            items: file_names
                .iter()
                .map(|name| DownloadItem {
                    url: format!("{base}/{name}"),
                    file_name: (*name).to_string(),
                })
                .collect(),
        }
    }

    pub fn pop_front(&mut self) -> Option<DownloadItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A progress snapshot for the file currently transferring.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub file_name: String,
    /// Files queued after this one.
    pub files_remaining: usize,
    pub bytes_done: u64,
    /// `Content-Length`, when the server sent one.
    pub total: Option<u64>,
    /// Bytes per second since this transfer started.
    pub rate: f64,
}

const MIB: u64 = 1024 * 1024;

impl DownloadProgress {
    /// Headline, e.g. `Downloading sprout-proving.key ( +2 more remaining )`.
    pub fn info(&self) -> String {
        if self.files_remaining > 0 {
            format!(
                "Downloading {} ( +{} more remaining )",
                self.file_name, self.files_remaining
            )
        } else {
            format!("Downloading {}", self.file_name)
        }
    }

    /// Detail line, e.g. `12MB of 869MB at 4.3 MB/s`.
    pub fn detail(&self) -> String {
        let (rate, unit) = scale_rate(self.rate);
        let done = self.bytes_done / MIB;
        match self.total {
            Some(total) => format!("{done}MB of {}MB at {rate:.1} {unit}", total / MIB),
            None => format!("{done}MB at {rate:.1} {unit}"),
        }
    }
}

/// Pick a unit for a bytes-per-second figure.
fn scale_rate(bytes_per_sec: f64) -> (f64, &'static str) {
    if bytes_per_sec < 1024.0 {
        (bytes_per_sec, "bytes/sec")
    } else if bytes_per_sec < (1024 * 1024) as f64 {
        (bytes_per_sec / 1024.0, "kB/s")
    } else {
        (bytes_per_sec / (1024.0 * 1024.0), "MB/s")
    }
}

/// What a completed [`ParamFetcher::download_missing`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: Vec<String>,
    /// Already present, no network I/O.
    pub skipped: Vec<String>,
    pub bytes: u64,
}

/// Receives download progress.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &DownloadProgress);

    fn on_complete(&self, summary: &DownloadSummary);
}

/// Parameter checking and fetching as the bootstrap sees it.
pub trait ParamsProvider: Send + Sync {
    /// Whether every required file is present.
    fn ensure_params(&self) -> bool;

    /// Fetch whatever is missing.
    fn download_missing<'a>(
        &'a self,
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<DownloadSummary, ParamsError>>;
}

/// Checks and fetches the files in [`REQUIRED_PARAMS`].
pub struct ParamFetcher {
    params_dir: PathBuf,
    base_url: String,
    client: Client,
}

impl ParamFetcher {
    pub fn new(params_dir: impl Into<PathBuf>) -> Result<Self, ParamsError> {
        let client = Client::builder()
            .user_agent(build_info::user_agent())
            .build()
            .map_err(|e| ParamsError::Client(e.to_string()))?;
        Ok(Self {
            params_dir: params_dir.into(),
            base_url: PARAMS_BASE_URL.to_string(),
            client,
        })
    }

    /// Fetch from a different mirror.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn params_dir(&self) -> &Path {
        &self.params_dir
    }

    /// Required files not yet in the params directory.
    pub fn missing(&self) -> Vec<&'static str> {
        REQUIRED_PARAMS
            .iter()
            .copied()
            .filter(|name| !self.params_dir.join(name).is_file())
            .collect()
    }

    /// Create the params directory if needed and report whether every file
    /// is present.
    pub fn ensure_params(&self) -> bool {
        if !self.params_dir.exists() {
            match std::fs::create_dir_all(&self.params_dir) {
                Ok(()) => info!(dir = %self.params_dir.display(), "Created params directory"),
                Err(e) => warn!(dir = %self.params_dir.display(), error = %e, "Could not create params directory"),
            }
        }
        let missing = self.missing();
        if !missing.is_empty() {
            info!(?missing, "Params missing");
        }
        missing.is_empty()
    }

    /// Download every missing file in order, stopping at the first failure.
    pub async fn download_missing(
        &self,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadSummary, ParamsError> {
        tokio::fs::create_dir_all(&self.params_dir)
            .await
            .map_err(|source| ParamsError::CreateDir {
                path: self.params_dir.clone(),
                source,
            })?;

        let mut queue = DownloadQueue::new(&self.base_url, &REQUIRED_PARAMS);
        let mut summary = DownloadSummary::default();

        while let Some(item) = queue.pop_front() {
            let target = self.params_dir.join(&item.file_name);
            if target.is_file() {
                debug!(file = %item.file_name, "Already present");
                summary.skipped.push(item.file_name);
                continue;
            }

            let bytes = self.download_one(&item, &target, queue.len(), progress).await?;
            summary.bytes += bytes;
            summary.downloaded.push(item.file_name);
        }

        info!(
            downloaded = summary.downloaded.len(),
            bytes = summary.bytes,
            "All params downloaded"
        );
        progress.on_complete(&summary);
        Ok(summary)
    }

    async fn download_one(
        &self,
        item: &DownloadItem,
        target: &Path,
        files_remaining: usize,
        progress: &dyn ProgressSink,
    ) -> Result<u64, ParamsError> {
        let part = target.with_extension(part_extension(target));

        let result = match self.transfer(item, &part, files_remaining, progress).await {
            Ok(bytes) => tokio::fs::rename(&part, target)
                .await
                .map(|()| bytes)
                .map_err(|source| ParamsError::Write {
                    path: target.to_path_buf(),
                    source,
                }),
            Err(e) => Err(e),
        };

        match &result {
            Ok(bytes) => info!(file = %item.file_name, bytes, "Downloaded"),
            Err(e) => {
                warn!(file = %item.file_name, error = %e, "Download failed");
                if let Err(rm) = tokio::fs::remove_file(&part).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %part.display(), error = %rm, "Could not remove partial file");
                }
            }
        }
        result
    }

    async fn transfer(
        &self,
        item: &DownloadItem,
        part: &Path,
        files_remaining: usize,
        progress: &dyn ProgressSink,
    ) -> Result<u64, ParamsError> {
        let request_err = |e: reqwest::Error| ParamsError::Request {
            url: item.url.clone(),
            message: e.to_string(),
        };
        let write_err = |source| ParamsError::Write {
            path: part.to_path_buf(),
            source,
        };

        info!(url = %item.url, "Downloading");
        let resp = self.client.get(&item.url).send().await.map_err(request_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ParamsError::Status {
                url: item.url.clone(),
                status: status.as_u16(),
            });
        }

        let total = resp.content_length();
        let mut file = tokio::fs::File::create(part).await.map_err(write_err)?;
        let mut stream = resp.bytes_stream();

        let started = Instant::now();
        let mut last_report: Option<Instant> = None;
        let mut done: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(request_err)?;
            file.write_all(&chunk).await.map_err(write_err)?;
            done += chunk.len() as u64;

            if last_report.is_none_or(|at| at.elapsed() >= PROGRESS_INTERVAL) {
                last_report = Some(Instant::now());
                let elapsed = started.elapsed().as_secs_f64().max(0.001);
                progress.on_progress(&DownloadProgress {
                    file_name: item.file_name.clone(),
                    files_remaining,
                    bytes_done: done,
                    total,
                    rate: done as f64 / elapsed,
                });
            }
        }

        file.flush().await.map_err(write_err)?;
        drop(file);

        if let Some(expected) = total
            && expected != done
        {
            return Err(ParamsError::Incomplete {
                file_name: item.file_name.clone(),
                expected,
                received: done,
            });
        }
        Ok(done)
    }
}

/// `params` -> `params.part`, `key` -> `key.part`.
fn part_extension(target: &Path) -> String {
    match target.extension() {
        Some(ext) => format!("{}.{PART_SUFFIX}", ext.to_string_lossy()),
        None => PART_SUFFIX.to_string(),
    }
}

impl ParamsProvider for ParamFetcher {
    fn ensure_params(&self) -> bool {
        ParamFetcher::ensure_params(self)
    }

    fn download_missing<'a>(
        &'a self,
        progress: &'a dyn ProgressSink,
    ) -> BoxFuture<'a, Result<DownloadSummary, ParamsError>> {
        Box::pin(ParamFetcher::download_missing(self, progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{Path as UrlPath, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CollectProgress {
        events: Mutex<Vec<DownloadProgress>>,
        completed: Mutex<Option<DownloadSummary>>,
    }

    impl ProgressSink for CollectProgress {
        fn on_progress(&self, progress: &DownloadProgress) {
            self.events.lock().unwrap().push(progress.clone());
        }

        fn on_complete(&self, summary: &DownloadSummary) {
            *self.completed.lock().unwrap() = Some(summary.clone());
        }
    }

    #[derive(Clone, Default)]
    struct Mirror {
        files: Arc<HashMap<String, Vec<u8>>>,
        hits: Arc<Mutex<Vec<String>>>,
    }

    async fn serve_file(
        State(mirror): State<Mirror>,
        UrlPath(name): UrlPath<String>,
    ) -> Result<Vec<u8>, StatusCode> {
        mirror.hits.lock().unwrap().push(name.clone());
        mirror.files.get(&name).cloned().ok_or(StatusCode::NOT_FOUND)
    }

    async fn start_mirror(files: &[(&str, &[u8])]) -> (String, Mirror) {
        let mirror = Mirror {
            files: Arc::new(
                files
                    .iter()
                    .map(|(name, body)| (name.to_string(), body.to_vec()))
                    .collect(),
            ),
            hits: Arc::default(),
        };
        let router = Router::new()
            .route("/downloads/{name}", get(serve_file))
            .with_state(mirror.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/downloads"), mirror)
    }

    fn all_files() -> Vec<(&'static str, &'static [u8])> {
        REQUIRED_PARAMS
            .iter()
            .map(|&name| (name, name.as_bytes()))
            .collect()
    }

    #[test]
    fn test_queue_order_and_urls() {
        let mut queue = DownloadQueue::new("https://example.org/dl/", &REQUIRED_PARAMS);
        assert_eq!(queue.len(), 5);
        let first = queue.pop_front().unwrap();
        assert_eq!(first.file_name, "sapling-output.params");
        assert_eq!(first.url, "https://example.org/dl/sapling-output.params");
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_new_builds_client() {
        let tmp = TempDir::new().unwrap();
        let fetcher = ParamFetcher::new(tmp.path()).unwrap();
        assert_eq!(fetcher.params_dir(), tmp.path());
        assert_eq!(fetcher.missing().len(), REQUIRED_PARAMS.len());
    }

    #[test]
    fn test_ensure_params_creates_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("zcash-params");
        let fetcher = ParamFetcher::new(&dir).unwrap();

        assert!(!fetcher.ensure_params());
        assert!(dir.is_dir());
        assert_eq!(fetcher.missing().len(), 5);

        for name in REQUIRED_PARAMS {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        assert!(fetcher.ensure_params());
    }

    #[test]
    fn test_progress_rendering() {
        let progress = DownloadProgress {
            file_name: "sprout-proving.key".into(),
            files_remaining: 2,
            bytes_done: 12 * MIB,
            total: Some(869 * MIB),
            rate: 4.5 * MIB as f64,
        };
        assert_eq!(
            progress.info(),
            "Downloading sprout-proving.key ( +2 more remaining )"
        );
        assert_eq!(progress.detail(), "12MB of 869MB at 4.5 MB/s");

        let last = DownloadProgress {
            files_remaining: 0,
            total: None,
            rate: 512.0,
            ..progress
        };
        assert_eq!(last.info(), "Downloading sprout-proving.key");
        assert_eq!(last.detail(), "12MB at 512.0 bytes/sec");
    }

    #[test]
    fn test_rate_units() {
        assert_eq!(scale_rate(100.0).1, "bytes/sec");
        assert_eq!(scale_rate(2048.0), (2.0, "kB/s"));
        assert_eq!(scale_rate(3.0 * MIB as f64), (3.0, "MB/s"));
    }

    #[test]
    fn test_part_path() {
        let target = Path::new("/p/sprout-proving.key");
        assert_eq!(
            target.with_extension(part_extension(target)),
            Path::new("/p/sprout-proving.key.part")
        );
    }

    #[tokio::test]
    async fn test_download_all() {
        let tmp = TempDir::new().unwrap();
        let (base, mirror) = start_mirror(&all_files()).await;
        let fetcher = ParamFetcher::new(tmp.path()).unwrap().with_base_url(base);
        let progress = CollectProgress::default();

        let summary = fetcher.download_missing(&progress).await.unwrap();
        assert_eq!(summary.downloaded.len(), 5);
        assert!(summary.skipped.is_empty());
        assert!(fetcher.ensure_params());

        for name in REQUIRED_PARAMS {
            assert_eq!(std::fs::read(tmp.path().join(name)).unwrap(), name.as_bytes());
            assert!(!tmp.path().join(format!("{name}.part")).exists());
        }
        assert_eq!(mirror.hits.lock().unwrap().len(), 5);
        assert_eq!(*progress.completed.lock().unwrap(), Some(summary));

        let events = progress.events.lock().unwrap();
        assert_eq!(events[0].file_name, "sapling-output.params");
        assert_eq!(events[0].files_remaining, 4);
    }

    #[tokio::test]
    async fn test_present_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("sapling-spend.params"), b"local").unwrap();
        let (base, mirror) = start_mirror(&all_files()).await;
        let fetcher = ParamFetcher::new(tmp.path()).unwrap().with_base_url(base);

        let summary = fetcher
            .download_missing(&CollectProgress::default())
            .await
            .unwrap();
        assert_eq!(summary.skipped, vec!["sapling-spend.params".to_string()]);
        assert!(
            !mirror
                .hits
                .lock()
                .unwrap()
                .contains(&"sapling-spend.params".to_string())
        );
        assert_eq!(
            std::fs::read(tmp.path().join("sapling-spend.params")).unwrap(),
            b"local"
        );
    }

    #[tokio::test]
    async fn test_failure_aborts_queue_and_leaves_no_partial() {
        let tmp = TempDir::new().unwrap();
        // The mirror is missing the second file.
        let files: Vec<_> = all_files()
            .into_iter()
            .filter(|(name, _)| *name != "sapling-spend.params")
            .collect();
        let (base, mirror) = start_mirror(&files).await;
        let fetcher = ParamFetcher::new(tmp.path()).unwrap().with_base_url(base);
        let progress = CollectProgress::default();

        let err = fetcher.download_missing(&progress).await.unwrap_err();
        assert!(matches!(err, ParamsError::Status { status: 404, .. }));

        assert!(tmp.path().join("sapling-output.params").is_file());
        assert!(!tmp.path().join("sapling-spend.params").exists());
        assert!(!tmp.path().join("sapling-spend.params.part").exists());
        assert!(!tmp.path().join("sprout-groth16.params").exists());
        assert_eq!(mirror.hits.lock().unwrap().len(), 2);
        assert!(progress.completed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_mirror() {
        let tmp = TempDir::new().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = ParamFetcher::new(tmp.path()).unwrap().with_base_url(format!("http://{addr}"));
        let err = fetcher
            .download_missing(&CollectProgress::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ParamsError::Request { .. }));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
