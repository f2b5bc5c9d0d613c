//! Chunked parallel downloader.
//!
//! The remote size is looked up first, the file is split into fixed-size ranges
//! and each range is fetched by its own task into a private temp directory.
//! Tasks run under a semaphore and a shared cancellation token: the first
//! fatal failure cancels the rest. Once every chunk is complete the pieces are
//! concatenated in order into `<dest>.part`, which is renamed over `dest`.
//!
//! A retry resumes its chunk where the previous attempt stopped, so the shared
//! byte counter only ever grows and ends equal to the file size.

mod chunk;
mod progress;

pub use chunk::{chunk_file_name, plan_chunks, Chunk, ChunkState};
pub use progress::Progress;

use crate::error::ErrorKind;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a transport or status failure was doing at the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Size,
    Chunk(usize),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Size => f.write_str("size lookup"),
            Stage::Chunk(i) => write!(f, "chunk {}", i),
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("transport error during {stage}: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} during {stage}")]
    UnexpectedStatus { stage: Stage, status: StatusCode },

    #[error("chunk {chunk} truncated: expected {expected} bytes, received {received}")]
    Truncated {
        chunk: usize,
        expected: u64,
        received: u64,
    },

    #[error("chunk {chunk} answered with range {received}, expected {expected}")]
    RangeMismatch {
        chunk: usize,
        expected: String,
        received: String,
    },

    #[error("cannot determine remote size: {reason}")]
    UnknownSize { reason: String },

    #[error("download canceled")]
    Canceled,

    #[error("download timed out after {}s", after.as_secs())]
    TimedOut { after: Duration },

    #[error("failed to create chunk workspace: {0}")]
    TempCreate(#[source] io::Error),

    #[error("failed to write chunk {chunk} to {}: {source}", path.display())]
    ChunkIo {
        chunk: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to assemble {}: {source}", path.display())]
    Merge {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("chunk {chunk} failed after {attempts} attempts: {source}")]
    Exhausted {
        chunk: usize,
        attempts: u32,
        #[source]
        source: Box<DownloadError>,
    },

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid download options: {0}")]
    InvalidOptions(String),

    #[error("chunk worker aborted: {0}")]
    Worker(String),
}

impl DownloadError {
    /// Failures worth another attempt of the same chunk.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Transport { .. }
            | DownloadError::UnexpectedStatus { .. }
            | DownloadError::RangeMismatch { .. }
            | DownloadError::Truncated { .. } => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Canceled | DownloadError::TimedOut { .. } => ErrorKind::Canceled,
            DownloadError::TempCreate(_)
            | DownloadError::ChunkIo { .. }
            | DownloadError::Merge { .. } => ErrorKind::Filesystem,
            DownloadError::InvalidOptions(_) => ErrorKind::Input,
            DownloadError::Exhausted { source, .. } => source.kind(),
            _ => ErrorKind::Remote,
        }
    }
}

/// Downloader tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub chunk_size: u64,
    pub concurrent_chunks: usize,
    /// Total attempts per chunk, first try included
    pub retry_count: u32,
    pub retry_delay: Duration,
    /// Per-request timeout; a stalled chunk fails this attempt only
    pub request_timeout: Duration,
    pub show_progress: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            chunk_size: 5 * 1024 * 1024,
            concurrent_chunks: 10,
            retry_count: 5,
            retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            show_progress: true,
        }
    }
}

impl DownloadOptions {
    fn validate(&self) -> Result<(), DownloadError> {
        if self.chunk_size == 0 {
            return Err(DownloadError::InvalidOptions("chunk_size must be positive".into()));
        }
        if self.concurrent_chunks == 0 {
            return Err(DownloadError::InvalidOptions(
                "concurrent_chunks must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub size: u64,
    pub chunks: usize,
    /// Bytes counted by the progress tracker, equal to `size` on success
    pub bytes_counted: u64,
    /// Attempts used per chunk, by chunk index
    pub attempts: Vec<u32>,
}

pub struct Downloader {
    http: reqwest::Client,
    opts: DownloadOptions,
}

impl Downloader {
    pub fn new(opts: DownloadOptions) -> Result<Self, DownloadError> {
        Self::with_user_agent(opts, &format!("sbx/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn with_user_agent(opts: DownloadOptions, user_agent: &str) -> Result<Self, DownloadError> {
        opts.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(opts.request_timeout)
            .build()
            .map_err(DownloadError::Client)?;
        Ok(Self { http, opts })
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.opts
    }

    /// Download `url` to `dest`, giving up once `budget` has elapsed.
    pub async fn download_within(
        &self,
        cancel: &CancellationToken,
        url: &str,
        dest: &Path,
        budget: Duration,
    ) -> Result<DownloadReport, DownloadError> {
        let scoped = cancel.child_token();
        tokio::select! {
            result = self.download(&scoped, url, dest) => result,
            _ = tokio::time::sleep(budget) => {
                scoped.cancel();
                Err(DownloadError::TimedOut { after: budget })
            }
        }
    }

    /// Download `url` to `dest`.
    ///
    /// `dest` is only ever replaced by a complete file. The chunk workspace
    /// is removed on every exit path.
    pub async fn download(
        &self,
        cancel: &CancellationToken,
        url: &str,
        dest: &Path,
    ) -> Result<DownloadReport, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Canceled);
        }

        let size = self.lookup_size(cancel, url).await?;
        let chunks = plan_chunks(size, self.opts.chunk_size);
        info!(
            url,
            size,
            chunks = chunks.len(),
            concurrency = self.opts.concurrent_chunks,
            "Starting chunked download"
        );

        let workspace = tempfile::Builder::new()
            .prefix("download-")
            .tempdir()
            .map_err(DownloadError::TempCreate)?;

        let label = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let progress = Arc::new(Progress::new(size, &label, self.opts.show_progress));

        let attempts = self
            .fetch_all(cancel, url, size, workspace.path(), &chunks, Arc::clone(&progress))
            .await?;

        merge_chunks(workspace.path(), chunks.len(), dest, cancel).await?;
        progress.finish();

        let bytes_counted = progress.bytes();
        if bytes_counted != size {
            warn!(bytes_counted, size, "Progress counter disagrees with file size");
        }
        info!(dest = %dest.display(), size, "Download complete");

        Ok(DownloadReport {
            size,
            chunks: chunks.len(),
            bytes_counted,
            attempts,
        })
    }

    /// Remote size from HEAD, falling back to a one-byte ranged GET when the
    /// server rejects HEAD or omits the length.
    async fn lookup_size(&self, cancel: &CancellationToken, url: &str) -> Result<u64, DownloadError> {
        let transport = |source| DownloadError::Transport {
            stage: Stage::Size,
            source,
        };

        let head = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Canceled),
            r = self.http.head(url).send() => r.map_err(transport)?,
        };

        match head.status() {
            StatusCode::OK => {
                if let Some(len) = header_u64(head.headers(), CONTENT_LENGTH).filter(|n| *n > 0) {
                    debug!(len, "HEAD reported content length");
                    return Ok(len);
                }
            }
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {}
            status => {
                return Err(DownloadError::UnknownSize {
                    reason: format!("HEAD returned {}", status),
                })
            }
        }

        debug!("HEAD gave no usable length, probing with a ranged GET");
        let ranged = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Canceled),
            r = self.http.get(url).header(RANGE, "bytes=0-0").send() => r.map_err(transport)?,
        };

        if ranged.status() != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::UnknownSize {
                reason: format!("server does not serve byte ranges ({})", ranged.status()),
            });
        }

        ranged
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .map(|(_, _, total)| total)
            .filter(|n| *n > 0)
            .ok_or_else(|| DownloadError::UnknownSize {
                reason: "no total length in Content-Range".into(),
            })
    }

    /// Run every chunk task to completion, cancelling the group on the first
    /// fatal error. Returns attempts used per chunk.
    async fn fetch_all(
        &self,
        cancel: &CancellationToken,
        url: &str,
        size: u64,
        workspace: &Path,
        chunks: &[Chunk],
        progress: Arc<Progress>,
    ) -> Result<Vec<u32>, DownloadError> {
        let group = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.opts.concurrent_chunks));
        let url: Arc<str> = Arc::from(url);
        let mut tasks = JoinSet::new();

        for chunk in chunks.iter().copied() {
            let worker = ChunkWorker {
                http: self.http.clone(),
                url: Arc::clone(&url),
                path: workspace.join(chunk.file_name()),
                chunk,
                size,
                progress: Arc::clone(&progress),
                cancel: group.clone(),
                retry_count: self.opts.retry_count.max(1),
                retry_delay: self.opts.retry_delay,
            };
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = worker.cancel.cancelled() => return (chunk.index, Err(DownloadError::Canceled)),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return (chunk.index, Err(DownloadError::Canceled)),
                    },
                };
                (chunk.index, worker.run().await)
            });
        }

        let mut attempts = vec![0; chunks.len()];
        let mut first_error: Option<DownloadError> = None;

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((index, Ok(used))) => {
                    attempts[index] = used;
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) => DownloadError::Worker(e.to_string()),
            };

            if first_error.is_none() {
                if !matches!(outcome, DownloadError::Canceled) {
                    warn!("Download failed, canceling remaining chunks: {}", outcome);
                }
                group.cancel();
                first_error = Some(outcome);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(attempts),
        }
    }
}

/// Convenience wrapper: build a [`Downloader`] from `opts` and fetch once.
pub async fn download(
    cancel: &CancellationToken,
    url: &str,
    dest: &Path,
    opts: &DownloadOptions,
) -> Result<DownloadReport, DownloadError> {
    Downloader::new(opts.clone())?.download(cancel, url, dest).await
}

/// One chunk's fetch loop.
struct ChunkWorker {
    http: reqwest::Client,
    url: Arc<str>,
    path: PathBuf,
    chunk: Chunk,
    /// Size of the whole file, from the size lookup
    size: u64,
    progress: Arc<Progress>,
    cancel: CancellationToken,
    retry_count: u32,
    retry_delay: Duration,
}

impl ChunkWorker {
    /// Fetch the chunk, retrying transient failures. Returns attempts used.
    async fn run(self) -> Result<u32, DownloadError> {
        let index = self.chunk.index;
        let mut state = ChunkState::Planned;
        let mut written = 0u64;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            state = advance(index, state, ChunkState::Fetching);

            let err = match self.attempt(&mut written).await {
                Ok(()) => {
                    advance(index, state, ChunkState::Done);
                    return Ok(attempt);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                advance(index, state, ChunkState::Failed);
                return Err(err);
            }
            if attempt >= self.retry_count {
                advance(index, state, ChunkState::Failed);
                return Err(DownloadError::Exhausted {
                    chunk: index,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            state = advance(index, state, ChunkState::Retrying);
            warn!(
                chunk = index,
                attempt,
                max_attempts = self.retry_count,
                resume_at = self.chunk.start + written,
                "Chunk attempt failed, retrying: {}",
                err
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    advance(index, state, ChunkState::Failed);
                    return Err(DownloadError::Canceled);
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    /// One ranged request, resuming after the `written` bytes already on disk.
    async fn attempt(&self, written: &mut u64) -> Result<(), DownloadError> {
        let expected = self.chunk.len();
        if *written >= expected {
            return Ok(());
        }

        let index = self.chunk.index;
        let request = self
            .http
            .get(&*self.url)
            .header(RANGE, self.chunk.range_header(*written));

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DownloadError::Canceled),
            r = request.send() => r.map_err(|source| DownloadError::Transport {
                stage: Stage::Chunk(index),
                source,
            })?,
        };

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::UnexpectedStatus {
                stage: Stage::Chunk(index),
                status: response.status(),
            });
        }
        self.check_range(response.headers(), *written)?;

        let io_err = |source| DownloadError::ChunkIo {
            chunk: index,
            path: self.path.clone(),
            source,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;

        let mut body = response.bytes_stream();
        let copied: Result<(), DownloadError> = async {
            loop {
                let next = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(DownloadError::Canceled),
                    next = body.next() => next,
                };
                let bytes = match next {
                    None => return Ok(()),
                    Some(Ok(bytes)) => bytes,
                    Some(Err(source)) => {
                        return Err(DownloadError::Transport {
                            stage: Stage::Chunk(index),
                            source,
                        })
                    }
                };

                let room = (expected - *written) as usize;
                let take = bytes.len().min(room);
                file.write_all(&bytes[..take]).await.map_err(io_err)?;
                *written += take as u64;
                self.progress.add(take as u64);

                if take < bytes.len() {
                    warn!(chunk = index, extra = bytes.len() - take, "Server sent more than requested, ignoring excess");
                    return Ok(());
                }
            }
        }
        .await;

        // Flush regardless so a resumed attempt appends after every counted byte.
        let flushed = file.flush().await.map_err(io_err);
        copied?;
        flushed?;

        if *written != expected {
            return Err(DownloadError::Truncated {
                chunk: index,
                expected,
                received: *written,
            });
        }
        Ok(())
    }

    /// The 206 must cover exactly the requested slice of the looked-up file.
    fn check_range(&self, headers: &reqwest::header::HeaderMap, written: u64) -> Result<(), DownloadError> {
        let wanted = (self.chunk.start + written, self.chunk.end, self.size);
        let received = headers.get(CONTENT_RANGE).and_then(|v| v.to_str().ok());
        if received.and_then(parse_content_range) == Some(wanted) {
            return Ok(());
        }
        Err(DownloadError::RangeMismatch {
            chunk: self.chunk.index,
            expected: format!("bytes {}-{}/{}", wanted.0, wanted.1, wanted.2),
            received: received.unwrap_or("none").to_string(),
        })
    }
}

fn advance(index: usize, from: ChunkState, to: ChunkState) -> ChunkState {
    debug_assert!(from.can_advance_to(to), "chunk {index}: {from} -> {to}");
    debug!(chunk = index, "{} -> {}", from, to);
    to
}

/// Concatenate `chunk_0..chunk_{count-1}` into `<dest>.part`, then rename.
async fn merge_chunks(
    workspace: &Path,
    count: usize,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<(), DownloadError> {
    let mut partial = PartialFile::new(partial_path(dest));
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|source| DownloadError::Merge {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let merge_err = |source| DownloadError::Merge {
        path: partial.path.clone(),
        source,
    };
    let mut out = tokio::fs::File::create(&partial.path).await.map_err(merge_err)?;
    for index in 0..count {
        if cancel.is_cancelled() {
            return Err(DownloadError::Canceled);
        }
        let mut piece = tokio::fs::File::open(workspace.join(chunk_file_name(index)))
            .await
            .map_err(merge_err)?;
        tokio::io::copy(&mut piece, &mut out).await.map_err(merge_err)?;
    }
    out.flush().await.map_err(merge_err)?;
    out.sync_all().await.map_err(merge_err)?;
    drop(out);

    tokio::fs::rename(&partial.path, dest)
        .await
        .map_err(|source| DownloadError::Merge {
            path: dest.to_path_buf(),
            source,
        })?;
    partial.keep();
    Ok(())
}

/// `<dest>.part` while a merge is in flight. Removed on drop unless kept,
/// including when the merge future itself is dropped by a timeout.
struct PartialFile {
    path: PathBuf,
    kept: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, kept: false }
    }

    fn keep(&mut self) {
        self.kept = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// `(first, last, total)` from `bytes 0-0/12345`; `None` for `*` or malformed values.
fn parse_content_range(value: &str) -> Option<(u64, u64, u64)> {
    let (range, total) = value.trim().strip_prefix("bytes ")?.split_once('/')?;
    let (first, last) = range.split_once('-')?;
    Some((
        first.trim().parse().ok()?,
        last.trim().parse().ok()?,
        total.trim().parse().ok()?,
    ))
}
