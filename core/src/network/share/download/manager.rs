//! Download Manager
//!
//! Owns every `Download` of a client, keyed by content hash, and the set of
//! solicited hashes. A handle for an unknown hash only starts a download if
//! that hash was solicited first; handles for a hash already downloading
//! become extra sources.
//!
//! Terminal downloads (completed or canceled) are reaped together with
//! their solicitation when their status event is handled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::state::{Download, DownloadEvent, DownloadInfo, DownloadSettings, DownloadStatus};
use crate::data::{save_downloads, short_hash, DownloadRecord};
use crate::network::rpc::TransferHandle;

/// Capacity of the download event bus
const EVENT_CAPACITY: usize = 256;

/// Errors from download administration
#[derive(Debug)]
pub enum DownloadError {
    /// No download exists for this hash
    UnknownHash(String),
    /// A handle arrived for a hash nobody asked for
    Unsolicited(String),
    /// Persisting or restoring the download set failed
    Store(rusqlite::Error),
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadError::UnknownHash(hash) => write!(f, "no download for hash {}", short_hash(hash)),
            DownloadError::Unsolicited(hash) => {
                write!(f, "handle for unsolicited hash {}", short_hash(hash))
            }
            DownloadError::Store(e) => write!(f, "download store error: {}", e),
        }
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DownloadError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DownloadError {
    fn from(e: rusqlite::Error) -> Self {
        DownloadError::Store(e)
    }
}

/// What happened to a handle given to [`DownloadManager::add_handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// A new download was created, paused, with this handle as its source
    Created,
    /// The handle joined an existing download as a new source
    Attached,
    /// The download already had this handle
    Duplicate,
    /// The target could not be created; the download was canceled at birth
    Canceled,
}

/// All downloads of one client
pub struct DownloadManager {
    settings: DownloadSettings,
    downloads: RwLock<HashMap<String, Arc<Download>>>,
    solicitations: RwLock<HashSet<String>>,
    events: broadcast::Sender<DownloadEvent>,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    pub fn new(settings: DownloadSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            downloads: RwLock::new(HashMap::new()),
            solicitations: RwLock::new(HashSet::new()),
            events,
        }
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    /// Subscribe to status changes of every download
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    // ========== Solicitations ==========

    /// Record that handles for `hash` should be accepted
    pub async fn add_solicitation(&self, hash: &str) {
        if self.solicitations.write().await.insert(hash.to_string()) {
            info!(hash = short_hash(hash), "solicitation added");
        }
    }

    pub async fn remove_solicitation(&self, hash: &str) -> bool {
        let removed = self.solicitations.write().await.remove(hash);
        if removed {
            debug!(hash = short_hash(hash), "solicitation removed");
        }
        removed
    }

    pub async fn is_solicited(&self, hash: &str) -> bool {
        self.solicitations.read().await.contains(hash)
    }

    // ========== Handles ==========

    /// Route an incoming transfer handle to its download
    pub async fn add_handle(&self, handle: Arc<dyn TransferHandle>) -> Result<HandleOutcome, DownloadError> {
        let hash = handle.hash();
        let mut downloads = self.downloads.write().await;

        if let Some(existing) = downloads.get(&hash).cloned() {
            if !existing.status().await.is_terminal() {
                return Ok(if existing.add_source(handle).await {
                    let sources = existing.source_count().await;
                    debug!(
                        hash = short_hash(&hash),
                        sources = sources,
                        "handle attached to download"
                    );
                    HandleOutcome::Attached
                } else {
                    HandleOutcome::Duplicate
                });
            }
            // Finished but not yet reaped
            downloads.remove(&hash);
        }

        if !self.is_solicited(&hash).await {
            warn!(hash = short_hash(&hash), "rejecting unsolicited handle");
            return Err(DownloadError::Unsolicited(hash));
        }

        let download = Download::create(handle, &self.settings, self.events.clone()).await;
        if download.status().await == DownloadStatus::Canceled {
            self.remove_solicitation(&hash).await;
            return Ok(HandleOutcome::Canceled);
        }
        downloads.insert(hash, download);
        Ok(HandleOutcome::Created)
    }

    // ========== Control ==========

    pub async fn get(&self, hash: &str) -> Result<Arc<Download>, DownloadError> {
        self.downloads
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| DownloadError::UnknownHash(hash.to_string()))
    }

    pub async fn contains(&self, hash: &str) -> bool {
        self.downloads.read().await.contains_key(hash)
    }

    pub async fn len(&self) -> usize {
        self.downloads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.downloads.read().await.is_empty()
    }

    pub async fn resume(&self, hash: &str) -> Result<DownloadStatus, DownloadError> {
        info!(hash = short_hash(hash), "resuming download");
        Ok(self.get(hash).await?.resume().await)
    }

    pub async fn pause(&self, hash: &str) -> Result<DownloadStatus, DownloadError> {
        info!(hash = short_hash(hash), "pausing download");
        Ok(self.get(hash).await?.pause().await)
    }

    /// Cancel a download, forget it, and stop accepting handles for its hash
    pub async fn cancel(&self, hash: &str) -> Result<DownloadStatus, DownloadError> {
        let download = self.get(hash).await?;
        self.remove_solicitation(hash).await;
        let status = download.cancel().await;
        self.downloads.write().await.remove(hash);
        Ok(status)
    }

    /// Pause every download; already paused or finished ones are untouched
    pub async fn pause_all(&self) {
        let all: Vec<Arc<Download>> = self.downloads.read().await.values().cloned().collect();
        for download in &all {
            download.pause().await;
        }
        debug!(downloads = all.len(), "all downloads paused");
    }

    /// Bytes per second over the most recent block
    pub async fn speed(&self, hash: &str) -> Result<u64, DownloadError> {
        Ok(self.get(hash).await?.speed().await)
    }

    /// Snapshot of every download
    pub async fn downloads(&self) -> Vec<DownloadInfo> {
        let all: Vec<Arc<Download>> = self.downloads.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(all.len());
        for download in all {
            infos.push(download.info().await);
        }
        infos.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        infos
    }

    /// React to a status change: terminal downloads are forgotten
    ///
    /// Returns true if a download was reaped.
    pub async fn handle_event(&self, event: &DownloadEvent) -> bool {
        if !event.status.is_terminal() {
            return false;
        }

        let mut downloads = self.downloads.write().await;
        let Some(download) = downloads.get(&event.hash) else {
            return false;
        };
        // A newer download for the same hash may have replaced the finished one
        if !download.status().await.is_terminal() {
            return false;
        }
        downloads.remove(&event.hash);
        drop(downloads);

        self.remove_solicitation(&event.hash).await;
        info!(hash = short_hash(&event.hash), status = %event.status, "download finished");
        true
    }

    // ========== Persistence ==========

    /// Pause everything, stop the engines, and save the download set
    pub async fn close(&self, conn: &mut Connection) -> Result<usize, DownloadError> {
        self.pause_all().await;

        let all: Vec<Arc<Download>> = self.downloads.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(all.len());
        for download in &all {
            download.stop_engine().await;
            if !download.status().await.is_terminal() {
                records.push(download.record().await);
            }
        }

        save_downloads(conn, &records)?;
        info!(downloads = records.len(), "download set saved");
        Ok(records.len())
    }

    /// Rebuild saved downloads as dormant, sourceless downloads
    ///
    /// Each restored hash is solicited again so late handles are accepted.
    /// Records come from `load_downloads`.
    pub async fn restore(&self, records: &[DownloadRecord]) -> usize {
        let mut restored = 0;
        for record in records {
            if self.contains(&record.hash).await {
                continue;
            }
            let download = Download::restore(record, &self.settings, self.events.clone());
            self.downloads
                .write()
                .await
                .insert(record.hash.clone(), download);
            self.add_solicitation(&record.hash).await;
            restored += 1;
        }

        info!(downloads = restored, "download set restored");
        restored
    }
}
