//! Download state machine
//!
//! One `Download` per content hash being fetched. It owns the source set,
//! the status, and the per-range progress; the strategy engines in
//! `sequential` and `parallel` drive the actual transfer.
//!
//! Transitions:
//! - created from a first source: `Paused`
//! - `add_source` while `NoTransfers` or `Searching`: `Downloading`
//! - last source removed: `NoTransfers`
//! - `resume` with sources: `Downloading`; without: `Searching`
//! - `pause`: `Paused`
//! - `cancel`: `Canceled`, target deleted
//! - final range written: `Completed`

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{parallel, sequential};
use crate::data::{short_hash, DownloadRecord, RangeRecord};
use crate::network::rpc::{HandleId, TransferHandle};

/// Default bytes requested per read (32 KB)
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

/// Default number of ranges for the parallel strategy
pub const DEFAULT_RANGE_COUNT: usize = 4;

/// Lifecycle state of a download
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStatus {
    Downloading = 0,
    Paused = 1,
    Completed = 2,
    /// Reserved; local failures route to `Canceled`
    Error = 3,
    Canceled = 4,
    /// Dormant: no sources attached
    NoTransfers = 5,
    /// Asked to resume without sources; more are being searched for
    Searching = 6,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Canceled | DownloadStatus::Error
        )
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DownloadStatus::Downloading),
            1 => Some(DownloadStatus::Paused),
            2 => Some(DownloadStatus::Completed),
            3 => Some(DownloadStatus::Error),
            4 => Some(DownloadStatus::Canceled),
            5 => Some(DownloadStatus::NoTransfers),
            6 => Some(DownloadStatus::Searching),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Error => "error",
            DownloadStatus::Canceled => "canceled",
            DownloadStatus::NoTransfers => "no transfers",
            DownloadStatus::Searching => "searching",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a download pulls bytes from its sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadStrategy {
    /// One source at a time, front to back
    Sequential,
    /// Fixed ranges fetched concurrently from distinct sources
    #[default]
    Parallel,
}

impl DownloadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStrategy::Sequential => "sequential",
            DownloadStrategy::Parallel => "parallel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sequential" => Some(DownloadStrategy::Sequential),
            "parallel" => Some(DownloadStrategy::Parallel),
            _ => None,
        }
    }
}

/// Status change published on the download event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    pub hash: String,
    pub status: DownloadStatus,
}

/// Where and how new downloads are written
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Directory that receives downloaded files
    pub directory: PathBuf,
    pub strategy: DownloadStrategy,
    pub block_size: usize,
    /// Number of ranges for the parallel strategy
    pub ranges: usize,
}

impl DownloadSettings {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            strategy: DownloadStrategy::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            ranges: DEFAULT_RANGE_COUNT,
        }
    }

    pub fn with_strategy(mut self, strategy: DownloadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_ranges(mut self, ranges: usize) -> Self {
        self.ranges = ranges;
        self
    }
}

/// A contiguous byte range and how far it has been fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub next: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn fetched(&self) -> u64 {
        self.next - self.start
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.end
    }
}

/// Split `size` bytes into `count` contiguous ranges; the last absorbs the remainder
pub fn split_ranges(size: u64, count: usize) -> Vec<ByteRange> {
    let count = count.max(1) as u64;
    let part = size / count;
    (0..count)
        .map(|i| {
            let start = i * part;
            let end = if i == count - 1 { size } else { start + part };
            ByteRange { start, end, next: start }
        })
        .collect()
}

/// Snapshot of a download for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInfo {
    pub hash: String,
    pub file_name: String,
    pub target: PathBuf,
    pub size: u64,
    pub downloaded: u64,
    pub status: DownloadStatus,
    pub strategy: DownloadStrategy,
    pub sources: usize,
    /// Bytes per second over the most recent block
    pub speed: u64,
}

impl DownloadInfo {
    /// Percentage complete, 0-100
    pub fn progress(&self) -> f32 {
        if self.size == 0 {
            return if self.status == DownloadStatus::Completed { 100.0 } else { 0.0 };
        }
        (self.downloaded as f64 * 100.0 / self.size as f64) as f32
    }
}

struct Inner {
    status: DownloadStatus,
    /// Ordered by arrival; the front is the least recently added
    sources: Vec<Arc<dyn TransferHandle>>,
    ranges: Vec<ByteRange>,
    speed: u64,
}

impl Inner {
    fn downloaded(&self) -> u64 {
        self.ranges.iter().map(ByteRange::fetched).sum()
    }

    fn all_done(&self) -> bool {
        self.ranges.iter().all(ByteRange::is_done)
    }
}

/// One file being fetched
pub struct Download {
    hash: String,
    file_name: String,
    target: PathBuf,
    size: u64,
    strategy: DownloadStrategy,
    block_size: usize,
    inner: Mutex<Inner>,
    /// Writers hold it shared; cancel holds it exclusively while deleting
    io_gate: RwLock<()>,
    /// Wakes the strategy engine after a status or source change
    pub(super) wake: Notify,
    events: broadcast::Sender<DownloadEvent>,
    engine: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("hash", &short_hash(&self.hash))
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl Download {
    /// Start a download from its first source
    ///
    /// The target file is created in the download directory under the
    /// handle's file name. If that fails the download is born `Canceled`.
    pub async fn create(
        handle: Arc<dyn TransferHandle>,
        settings: &DownloadSettings,
        events: broadcast::Sender<DownloadEvent>,
    ) -> Arc<Self> {
        let hash = handle.hash();
        let file_name = handle.file_name();
        let size = handle.size();
        let target = settings.directory.join(sanitize_file_name(&file_name));

        let prepared = prepare_target(&settings.directory, &target).await;
        let ranges = match (settings.strategy, &prepared) {
            (DownloadStrategy::Sequential, Ok(existing)) => {
                let resumed = (*existing).min(size);
                vec![ByteRange { start: 0, end: size, next: resumed }]
            }
            (DownloadStrategy::Sequential, Err(_)) => split_ranges(size, 1),
            (DownloadStrategy::Parallel, _) => split_ranges(size, settings.ranges),
        };

        let download = Arc::new(Self {
            hash,
            file_name,
            target,
            size,
            strategy: settings.strategy,
            block_size: settings.block_size.max(1),
            inner: Mutex::new(Inner {
                status: DownloadStatus::Paused,
                sources: vec![handle],
                ranges,
                speed: 0,
            }),
            io_gate: RwLock::new(()),
            wake: Notify::new(),
            events,
            engine: Mutex::new(None),
        });

        match prepared {
            Ok(_) => {
                info!(
                    hash = short_hash(&download.hash),
                    file = %download.target.display(),
                    size = download.size,
                    strategy = download.strategy.as_str(),
                    "download created"
                );
            }
            Err(e) => {
                error!(file = %download.target.display(), error = %e, "cannot create download target");
                download.cancel().await;
            }
        }
        download
    }

    /// Rebuild a persisted download in the dormant state
    pub fn restore(
        record: &DownloadRecord,
        settings: &DownloadSettings,
        events: broadcast::Sender<DownloadEvent>,
    ) -> Arc<Self> {
        let strategy = DownloadStrategy::parse(&record.strategy).unwrap_or(settings.strategy);
        let ranges = restored_ranges(record, strategy, settings.ranges);

        Arc::new(Self {
            hash: record.hash.clone(),
            file_name: record.file_name.clone(),
            target: record.target_path.clone(),
            size: record.size,
            strategy,
            block_size: settings.block_size.max(1),
            inner: Mutex::new(Inner {
                status: DownloadStatus::NoTransfers,
                sources: Vec::new(),
                ranges,
                speed: 0,
            }),
            io_gate: RwLock::new(()),
            wake: Notify::new(),
            events,
            engine: Mutex::new(None),
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn strategy(&self) -> DownloadStrategy {
        self.strategy
    }

    pub(super) fn block_size(&self) -> usize {
        self.block_size
    }

    pub async fn status(&self) -> DownloadStatus {
        self.inner.lock().await.status
    }

    pub async fn downloaded(&self) -> u64 {
        self.inner.lock().await.downloaded()
    }

    pub async fn speed(&self) -> u64 {
        self.inner.lock().await.speed
    }

    /// Percentage complete, 0-100
    pub async fn progress(&self) -> f32 {
        self.info().await.progress()
    }

    pub async fn source_count(&self) -> usize {
        self.inner.lock().await.sources.len()
    }

    pub async fn ranges(&self) -> Vec<ByteRange> {
        self.inner.lock().await.ranges.clone()
    }

    pub(super) async fn sources(&self) -> Vec<Arc<dyn TransferHandle>> {
        self.inner.lock().await.sources.clone()
    }

    pub(super) async fn first_source(&self) -> Option<Arc<dyn TransferHandle>> {
        self.inner.lock().await.sources.first().cloned()
    }

    pub async fn info(&self) -> DownloadInfo {
        let inner = self.inner.lock().await;
        DownloadInfo {
            hash: self.hash.clone(),
            file_name: self.file_name.clone(),
            target: self.target.clone(),
            size: self.size,
            downloaded: inner.downloaded(),
            status: inner.status,
            strategy: self.strategy,
            sources: inner.sources.len(),
            speed: inner.speed,
        }
    }

    /// Persistable form of this download
    pub async fn record(&self) -> DownloadRecord {
        let inner = self.inner.lock().await;
        DownloadRecord {
            hash: self.hash.clone(),
            file_name: self.file_name.clone(),
            target_path: self.target.clone(),
            size: self.size,
            downloaded: inner.downloaded(),
            strategy: self.strategy.as_str().to_string(),
            status: inner.status.code(),
            ranges: inner
                .ranges
                .iter()
                .map(|r| RangeRecord { start: r.start, end: r.end, next: r.next })
                .collect(),
        }
    }

    fn publish(&self, status: DownloadStatus) {
        debug!(hash = short_hash(&self.hash), status = %status, "download status changed");
        // No subscribers is fine
        let _ = self.events.send(DownloadEvent {
            hash: self.hash.clone(),
            status,
        });
    }

    /// Add a source; returns false for a duplicate or a finished download
    pub async fn add_source(self: &Arc<Self>, handle: Arc<dyn TransferHandle>) -> bool {
        let start = {
            let mut inner = self.inner.lock().await;
            if inner.status.is_terminal() {
                return false;
            }
            let id = handle.handle_id();
            if inner.sources.iter().any(|s| s.handle_id() == id) {
                return false;
            }
            inner.sources.push(handle);
            trace!(hash = short_hash(&self.hash), sources = inner.sources.len(), "source added");

            match inner.status {
                DownloadStatus::NoTransfers | DownloadStatus::Searching => {
                    inner.status = DownloadStatus::Downloading;
                    true
                }
                _ => false,
            }
        };

        if start {
            self.publish(DownloadStatus::Downloading);
            self.ensure_engine().await;
        } else {
            self.wake.notify_one();
        }
        true
    }

    /// Remove a source; an emptied source set makes the download dormant
    pub async fn remove_source(&self, id: HandleId) -> bool {
        let (removed, dormant) = {
            let mut inner = self.inner.lock().await;
            let before = inner.sources.len();
            inner.sources.retain(|s| s.handle_id() != id);
            let removed = inner.sources.len() != before;

            let dormant = removed && inner.sources.is_empty() && !inner.status.is_terminal();
            if dormant {
                inner.status = DownloadStatus::NoTransfers;
            }
            (removed, dormant)
        };

        if removed {
            debug!(hash = short_hash(&self.hash), handle = id, "source removed");
        }
        if dormant {
            warn!(hash = short_hash(&self.hash), "download has no sources left");
            self.publish(DownloadStatus::NoTransfers);
        }
        self.wake.notify_one();
        removed
    }

    /// Continue transferring, or ask for sources if there are none
    pub async fn resume(self: &Arc<Self>) -> DownloadStatus {
        let status = {
            let mut inner = self.inner.lock().await;
            if inner.status.is_terminal() {
                return inner.status;
            }
            let next = if inner.sources.is_empty() {
                DownloadStatus::Searching
            } else if inner.all_done() {
                DownloadStatus::Completed
            } else {
                DownloadStatus::Downloading
            };
            if inner.status == next {
                return next;
            }
            inner.status = next;
            next
        };

        self.publish(status);
        if status == DownloadStatus::Downloading {
            self.ensure_engine().await;
        } else {
            self.wake.notify_one();
        }
        status
    }

    /// Settle a download whose engine has run out of work
    ///
    /// Moves to `Completed` when every range is fetched, or `Searching` when
    /// no source is left. Never starts an engine.
    pub(super) async fn settle(&self) -> DownloadStatus {
        let status = {
            let mut inner = self.inner.lock().await;
            if inner.status != DownloadStatus::Downloading {
                return inner.status;
            }
            let next = if inner.all_done() {
                DownloadStatus::Completed
            } else if inner.sources.is_empty() {
                DownloadStatus::Searching
            } else {
                return inner.status;
            };
            inner.status = next;
            next
        };

        self.publish(status);
        self.wake.notify_one();
        status
    }

    /// Halt transfer activity at the next block boundary
    pub async fn pause(&self) -> DownloadStatus {
        {
            let mut inner = self.inner.lock().await;
            if inner.status.is_terminal() || inner.status == DownloadStatus::Paused {
                return inner.status;
            }
            inner.status = DownloadStatus::Paused;
        }
        self.publish(DownloadStatus::Paused);
        self.wake.notify_one();
        DownloadStatus::Paused
    }

    /// Stop for good and delete the partial target file
    pub async fn cancel(&self) -> DownloadStatus {
        {
            let _exclusive = self.io_gate.write().await;
            {
                let mut inner = self.inner.lock().await;
                if inner.status.is_terminal() {
                    return inner.status;
                }
                inner.status = DownloadStatus::Canceled;
            }
            match tokio::fs::remove_file(&self.target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %self.target.display(), error = %e, "failed to delete canceled download");
                }
            }
        }
        info!(hash = short_hash(&self.hash), "download canceled");
        self.publish(DownloadStatus::Canceled);
        self.wake.notify_one();
        DownloadStatus::Canceled
    }

    /// Local I/O failure: the download cannot continue
    pub(super) async fn fail_local(&self, error: std::io::Error) {
        error!(
            hash = short_hash(&self.hash),
            file = %self.target.display(),
            error = %error,
            "local write failed, canceling download"
        );
        self.cancel().await;
    }

    /// Next block to fetch for range `index`, as (offset, length)
    pub(super) async fn next_block(&self, index: usize) -> Option<(u64, usize)> {
        let inner = self.inner.lock().await;
        let range = inner.ranges.get(index)?;
        if range.is_done() {
            return None;
        }
        let len = (range.end - range.next).min(self.block_size as u64) as usize;
        Some((range.next, len))
    }

    /// Indexes of ranges that still have bytes to fetch
    pub(super) async fn pending_ranges(&self) -> Vec<usize> {
        let inner = self.inner.lock().await;
        inner
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_done())
            .map(|(i, _)| i)
            .collect()
    }

    /// Write a block at `offset`, opening the target for this write only
    ///
    /// Returns `Ok(false)` without writing if the download was canceled.
    pub(super) async fn write_block(&self, offset: u64, data: &[u8]) -> std::io::Result<bool> {
        let _shared = self.io_gate.read().await;
        if self.status().await == DownloadStatus::Canceled {
            return Ok(false);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.target)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(true)
    }

    /// Account for `bytes` written to range `index`
    ///
    /// Completing the last range moves the download to `Completed`.
    pub(super) async fn record_progress(&self, index: usize, bytes: usize, elapsed: Duration) {
        let completed = {
            let mut inner = self.inner.lock().await;
            let Some(range) = inner.ranges.get_mut(index) else {
                return;
            };
            range.next = (range.next + bytes as u64).min(range.end);

            let secs = elapsed.as_secs_f64();
            inner.speed = if secs > 0.0 {
                (bytes as f64 / secs) as u64
            } else {
                bytes as u64
            };

            if inner.all_done() && !inner.status.is_terminal() {
                inner.status = DownloadStatus::Completed;
                true
            } else {
                false
            }
        };

        if completed {
            info!(
                hash = short_hash(&self.hash),
                file = %self.target.display(),
                size = self.size,
                "download completed"
            );
            self.publish(DownloadStatus::Completed);
            self.wake.notify_one();
        }
    }

    async fn ensure_engine(self: &Arc<Self>) {
        let mut engine = self.engine.lock().await;
        if engine.as_ref().is_some_and(|task| !task.is_finished()) {
            self.wake.notify_one();
            return;
        }

        let download = self.clone();
        let task = match self.strategy {
            DownloadStrategy::Sequential => tokio::spawn(sequential::run(download)),
            DownloadStrategy::Parallel => tokio::spawn(parallel::run(download)),
        };
        *engine = Some(task);
    }

    /// Abort the strategy engine, if any
    pub async fn stop_engine(&self) {
        if let Some(task) = self.engine.lock().await.take() {
            task.abort();
        }
    }
}

/// Keep only the final path component of a peer-supplied name
fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        "download.part".to_string()
    } else {
        base
    }
}

/// Create the target (without truncating) and return its current length
async fn prepare_target(directory: &Path, target: &Path) -> std::io::Result<u64> {
    tokio::fs::create_dir_all(directory).await?;
    let file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(target)
        .await?;
    Ok(file.metadata().await?.len())
}

fn restored_ranges(record: &DownloadRecord, strategy: DownloadStrategy, range_count: usize) -> Vec<ByteRange> {
    let stored: Vec<ByteRange> = record
        .ranges
        .iter()
        .map(|r| ByteRange { start: r.start, end: r.end, next: r.next.clamp(r.start, r.end) })
        .collect();

    let covers_file = !stored.is_empty()
        && stored.first().map(|r| r.start) == Some(0)
        && stored.last().map(|r| r.end) == Some(record.size)
        && stored.windows(2).all(|w| w[0].end == w[1].start);
    if covers_file {
        return stored;
    }

    match strategy {
        DownloadStrategy::Sequential => vec![ByteRange {
            start: 0,
            end: record.size,
            next: record.downloaded.min(record.size),
        }],
        DownloadStrategy::Parallel => split_ranges(record.size, range_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryHandle;

    fn settings(dir: &Path) -> DownloadSettings {
        DownloadSettings::new(dir).with_block_size(4)
    }

    fn bus() -> broadcast::Sender<DownloadEvent> {
        broadcast::channel(64).0
    }

    #[test]
    fn test_split_ranges_remainder_in_last() {
        let k = 25u64;
        let ranges = split_ranges(4 * k + 3, 4);
        let sizes: Vec<u64> = ranges.iter().map(ByteRange::len).collect();
        assert_eq!(sizes, vec![k, k, k, k + 3]);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[3].end, 4 * k + 3);
        for w in ranges.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn test_split_ranges_tiny_file() {
        let ranges = split_ranges(2, 4);
        assert_eq!(ranges.iter().map(ByteRange::len).sum::<u64>(), 2);
        assert_eq!(ranges[3].len(), 2);
    }

    #[test]
    fn test_status_codes_round_trip() {
        for code in 0..=6u8 {
            let status = DownloadStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(DownloadStatus::from_code(7).is_none());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("song.mp3"), "song.mp3");
        assert_eq!(sanitize_file_name(".."), "download.part");
    }

    #[tokio::test]
    async fn test_created_paused_with_one_source() {
        let dir = tempfile::tempdir().unwrap();
        let handle = MemoryHandle::new("a.bin", b"hello world".to_vec());
        let download = Download::create(handle, &settings(dir.path()), bus()).await;

        assert_eq!(download.status().await, DownloadStatus::Paused);
        assert_eq!(download.source_count().await, 1);
        assert!(download.target().exists());
        assert_eq!(download.target(), dir.path().join("a.bin"));
    }

    #[tokio::test]
    async fn test_cancel_deletes_target() {
        let dir = tempfile::tempdir().unwrap();
        let handle = MemoryHandle::new("a.bin", b"hello world".to_vec());
        let download = Download::create(handle, &settings(dir.path()), bus()).await;

        assert_eq!(download.cancel().await, DownloadStatus::Canceled);
        assert!(!download.target().exists());
        // Terminal: nothing moves it any more
        assert_eq!(download.resume().await, DownloadStatus::Canceled);
        assert!(!download.add_source(MemoryHandle::new("a.bin", b"hello world".to_vec())).await);
    }

    #[tokio::test]
    async fn test_removing_last_source_goes_dormant() {
        let dir = tempfile::tempdir().unwrap();
        let handle = MemoryHandle::new("a.bin", b"hello world".to_vec());
        let id = handle.handle_id();
        let events = bus();
        let mut rx = events.subscribe();
        let download = Download::create(handle, &settings(dir.path()), events).await;

        assert!(download.remove_source(id).await);
        assert_eq!(download.status().await, DownloadStatus::NoTransfers);
        assert_eq!(rx.recv().await.unwrap().status, DownloadStatus::NoTransfers);
    }

    #[tokio::test]
    async fn test_resume_without_sources_searches() {
        let dir = tempfile::tempdir().unwrap();
        let handle = MemoryHandle::new("a.bin", b"hello world".to_vec());
        let id = handle.handle_id();
        let events = bus();
        let download = Download::create(handle, &settings(dir.path()), events.clone()).await;
        download.remove_source(id).await;

        let mut rx = events.subscribe();
        assert_eq!(download.resume().await, DownloadStatus::Searching);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, DownloadStatus::Searching);
        assert_eq!(event.hash, download.hash());
    }

    #[tokio::test]
    async fn test_settle_only_moves_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let handle = MemoryHandle::new("a.bin", b"hello world".to_vec());
        let download = Download::create(handle, &settings(dir.path()), bus()).await;

        assert_eq!(download.settle().await, DownloadStatus::Paused);
        download.cancel().await;
        assert_eq!(download.settle().await, DownloadStatus::Canceled);
    }

    #[tokio::test]
    async fn test_duplicate_source_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let handle = MemoryHandle::new("a.bin", b"hello world".to_vec());
        let download = Download::create(handle.clone(), &settings(dir.path()), bus()).await;

        assert!(!download.add_source(handle).await);
        assert_eq!(download.source_count().await, 1);
    }

    #[tokio::test]
    async fn test_uncreatable_target_is_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file in the way").unwrap();

        let handle = MemoryHandle::new("a.bin", b"hello".to_vec());
        let download = Download::create(handle, &settings(&blocker), bus()).await;
        assert_eq!(download.status().await, DownloadStatus::Canceled);
    }

    #[tokio::test]
    async fn test_restore_is_dormant() {
        let record = DownloadRecord {
            hash: "ab".to_string(),
            file_name: "a.bin".to_string(),
            target_path: PathBuf::from("/tmp/a.bin"),
            size: 100,
            downloaded: 30,
            strategy: "sequential".to_string(),
            status: DownloadStatus::Downloading.code(),
            ranges: vec![],
        };
        let download = Download::restore(&record, &DownloadSettings::new("/tmp"), bus());

        assert_eq!(download.status().await, DownloadStatus::NoTransfers);
        assert_eq!(download.source_count().await, 0);
        assert_eq!(download.downloaded().await, 30);
        assert_eq!(download.strategy(), DownloadStrategy::Sequential);
    }

    #[tokio::test]
    async fn test_info_progress() {
        let info = DownloadInfo {
            hash: "h".into(),
            file_name: "f".into(),
            target: PathBuf::from("f"),
            size: 200,
            downloaded: 50,
            status: DownloadStatus::Downloading,
            strategy: DownloadStrategy::Parallel,
            sources: 1,
            speed: 0,
        };
        assert_eq!(info.progress(), 25.0);
    }
}
