//! Client node
//!
//! The role a content-holding peer plays in the overlay:
//! - as a provider it answers searches from its content directory and
//!   hands out transfer handles through the upload manager
//! - as a consumer it collects search replies and routes incoming
//!   handles to the download manager
//!
//! It also carries the driving API a front end uses (`connect`, `search`,
//! `download`, download control) and owns the client's background tasks.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::ProtocolConfig;
use super::error::ProtocolError;
use super::events::{DownloadChangedEvent, FileCompleteEvent, FileFoundEvent, ProtocolEvent};
use crate::data::{
    load_downloads, short_hash, start_db, Blake3Hasher, ContentDirectory, FileRecord,
};
use crate::network::rpc::{
    generate_search_id, Consumer, PeerId, Provider, RemoteError, RemoteResult, SearchId,
    TransferHandle,
};
use crate::network::search::{ReplyAggregator, SearchResult};
use crate::network::share::{
    DownloadEvent, DownloadInfo, DownloadManager, DownloadStatus, HandleOutcome, LocalHandle,
    UploadInfo, UploadManager,
};

/// Capacity of the application event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// A client peer: shares files, searches, downloads
pub struct ClientNode {
    id: PeerId,
    me: Weak<ClientNode>,
    pub(crate) config: ProtocolConfig,
    directory: Arc<ContentDirectory>,
    replies: ReplyAggregator,
    pub(crate) uploads: Arc<UploadManager>,
    pub(crate) downloads: Arc<DownloadManager>,
    /// Database connection (wrapped for thread safety)
    db: Arc<Mutex<Connection>>,
    /// The server this client is attached to
    server: RwLock<Option<Arc<dyn Provider>>>,
    event_tx: mpsc::Sender<ProtocolEvent>,
    event_rx: Arc<RwLock<Option<mpsc::Receiver<ProtocolEvent>>>>,
    pub(crate) running: Arc<RwLock<bool>>,
    pub(crate) tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for ClientNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientNode")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ClientNode {
    /// Start a client node
    ///
    /// Opens the database at the configured path, indexes the shared folder,
    /// restores saved downloads, and starts the background tasks.
    pub async fn start(config: ProtocolConfig) -> Result<Arc<Self>, ProtocolError> {
        let db_path = config.resolved_db_path();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = start_db(&db_path)?;
        info!(path = %db_path.display(), "database opened");

        Self::start_with_db(config, db).await
    }

    /// Start a client node on an already opened database
    pub async fn start_with_db(
        config: ProtocolConfig,
        db: Connection,
    ) -> Result<Arc<Self>, ProtocolError> {
        let directory = Arc::new(ContentDirectory::new(Arc::new(Blake3Hasher)));
        let shared = directory.index_folder(&config.shared_folder).await?;

        let downloads = Arc::new(DownloadManager::new(config.download_settings()));
        let records = load_downloads(&db)?;
        // Partial targets live in the shared folder but are not content yet
        for record in &records {
            directory.remove_path(&record.target_path).await;
        }
        let restored = downloads.restore(&records).await;

        let uploads = Arc::new(UploadManager::new(config.max_uploads));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let id = PeerId::random();

        let node = Arc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            config,
            directory,
            replies: ReplyAggregator::new(),
            uploads,
            downloads,
            db: Arc::new(Mutex::new(db)),
            server: RwLock::new(None),
            event_tx,
            event_rx: Arc::new(RwLock::new(Some(event_rx))),
            running: Arc::new(RwLock::new(true)),
            tasks: Arc::new(RwLock::new(Vec::new())),
        });

        node.start_background_tasks().await;

        info!(
            peer = %id,
            shared = shared,
            restored = restored,
            "client node started"
        );
        Ok(node)
    }

    /// Pause every download, save the download set, stop background tasks
    ///
    /// Returns the number of downloads saved.
    pub async fn shutdown(&self) -> Result<usize, ProtocolError> {
        info!(peer = %self.id, "stopping client node");

        {
            let mut running = self.running.write().await;
            *running = false;
        }

        {
            let mut tasks = self.tasks.write().await;
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        let saved = {
            let mut db = self.db.lock().await;
            self.downloads.close(&mut db).await?
        };

        info!(peer = %self.id, saved = saved, "client node stopped");
        Ok(saved)
    }

    /// Get the event receiver
    ///
    /// Can only be called once - subsequent calls return None.
    pub async fn events(&self) -> Option<mpsc::Receiver<ProtocolEvent>> {
        self.event_rx.write().await.take()
    }

    pub fn peer_id(&self) -> PeerId {
        self.id
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    async fn check_running(&self) -> Result<(), ProtocolError> {
        if !*self.running.read().await {
            return Err(ProtocolError::NotRunning);
        }
        Ok(())
    }

    fn this(&self) -> RemoteResult<Arc<ClientNode>> {
        self.me
            .upgrade()
            .ok_or_else(|| RemoteError::Unreachable("client node dropped".to_string()))
    }

    fn as_provider(&self) -> RemoteResult<Arc<dyn Provider>> {
        let me: Arc<dyn Provider> = self.this()?;
        Ok(me)
    }

    fn as_consumer(&self) -> RemoteResult<Arc<dyn Consumer>> {
        let me: Arc<dyn Consumer> = self.this()?;
        Ok(me)
    }

    fn emit(&self, event: ProtocolEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!(error = %e, "dropping protocol event");
        }
    }

    // ========== Server ==========

    /// Attach to `server` as a provider
    pub async fn connect(&self, server: Arc<dyn Provider>) -> Result<(), ProtocolError> {
        self.check_running().await?;
        server.identify(self.as_provider()?).await?;
        info!(peer = %self.id, server = %server.peer_id(), "connected to server");
        *self.server.write().await = Some(server);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.server.read().await.is_some()
    }

    async fn server(&self) -> Result<Arc<dyn Provider>, ProtocolError> {
        self.server.read().await.clone().ok_or(ProtocolError::NotConnected)
    }

    // ========== Sharing ==========

    /// Share one more file; returns its record
    pub async fn share_file(&self, path: &Path) -> Result<FileRecord, ProtocolError> {
        let (record, added) = self.directory.add_file(path).await?;
        if added {
            info!(hash = record.short_hash(), file = %record.name, "file shared");
        }
        Ok(record)
    }

    /// Every file this node offers
    pub async fn shared_files(&self) -> Vec<FileRecord> {
        let mut files = self.directory.all().await;
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    /// Running uploads
    pub async fn uploads(&self) -> Vec<UploadInfo> {
        self.uploads.running().await
    }

    /// Uploads waiting for a free slot
    pub async fn waiting_uploads(&self) -> Vec<UploadInfo> {
        self.uploads.waiting().await
    }

    /// Stop serving `hash`; every handle for it is invalidated
    pub async fn invalidate_uploads(&self, hash: &str) -> Result<usize, ProtocolError> {
        Ok(self.uploads.invalidate(hash).await?)
    }

    /// Hand `consumer` a transfer handle for `hash` if it is shared here
    async fn offer(&self, hash: &str, consumer: Arc<dyn Consumer>) {
        match self.directory.get(hash).await {
            Some(record) => {
                debug!(hash = short_hash(hash), consumer = %consumer.peer_id(), "offering file");
                self.uploads
                    .deliver_file(consumer, Arc::new(LocalHandle::new(record)))
                    .await;
            }
            None => debug!(hash = short_hash(hash), "file not shared here"),
        }
    }

    // ========== Searching ==========

    /// Search the overlay through the connected server
    pub async fn search(&self, query: &str) -> Result<SearchId, ProtocolError> {
        self.check_running().await?;
        let server = self.server().await?;

        let id = generate_search_id();
        self.replies.add_search(id).await;
        server.search_by_query(id, self.as_consumer()?, query).await?;

        info!(search_id = id, query = query, "search sent");
        Ok(id)
    }

    /// Everything found so far for search `id`
    pub async fn results(&self, id: SearchId) -> Result<SearchResult, ProtocolError> {
        Ok(self.replies.result(id).await?)
    }

    /// Forget the results of search `id`
    pub async fn close_search(&self, id: SearchId) -> Result<(), ProtocolError> {
        Ok(self.replies.remove_result(id).await?)
    }

    // ========== Downloading ==========

    /// Ask every provider that reported `hash` under `id` for the file
    ///
    /// Returns the number of providers that accepted the request.
    pub async fn download(&self, id: SearchId, hash: &str) -> Result<usize, ProtocolError> {
        self.check_running().await?;
        let providers = self.replies.providers(id, hash).await?;

        self.downloads.add_solicitation(hash).await;
        let me = self.as_consumer()?;

        let mut asked: Vec<PeerId> = Vec::new();
        for provider in providers {
            let peer = provider.peer_id();
            if peer == self.id || asked.contains(&peer) {
                continue;
            }
            match provider.get_file(hash, me.clone()).await {
                Ok(()) => asked.push(peer),
                Err(e) => warn!(peer = %peer, hash = short_hash(hash), error = %e, "file request failed"),
            }
        }

        info!(search_id = id, hash = short_hash(hash), providers = asked.len(), "file requested");
        Ok(asked.len())
    }

    pub async fn resume(&self, hash: &str) -> Result<DownloadStatus, ProtocolError> {
        Ok(self.downloads.resume(hash).await?)
    }

    pub async fn pause(&self, hash: &str) -> Result<DownloadStatus, ProtocolError> {
        Ok(self.downloads.pause(hash).await?)
    }

    pub async fn cancel(&self, hash: &str) -> Result<DownloadStatus, ProtocolError> {
        Ok(self.downloads.cancel(hash).await?)
    }

    /// Bytes per second over the most recent block
    pub async fn speed(&self, hash: &str) -> Result<u64, ProtocolError> {
        Ok(self.downloads.speed(hash).await?)
    }

    /// Snapshot of every download
    pub async fn downloads(&self) -> Vec<DownloadInfo> {
        self.downloads.downloads().await
    }

    /// React to a status change on the download bus
    pub(crate) async fn on_download_event(&self, event: DownloadEvent) {
        self.emit(ProtocolEvent::DownloadChanged(DownloadChangedEvent {
            hash: event.hash.clone(),
            status: event.status,
        }));

        match event.status {
            DownloadStatus::Searching => self.search_for_sources(&event.hash).await,
            DownloadStatus::Completed => self.on_download_complete(&event.hash).await,
            _ => {}
        }

        self.downloads.handle_event(&event).await;
    }

    async fn search_for_sources(&self, hash: &str) {
        let server = match self.server().await {
            Ok(server) => server,
            Err(_) => {
                debug!(hash = short_hash(hash), "no server to ask for sources");
                return;
            }
        };
        let me = match self.as_consumer() {
            Ok(me) => me,
            Err(_) => return,
        };

        match server.search_by_hash(hash, me).await {
            Ok(()) => debug!(hash = short_hash(hash), "asked server for more sources"),
            Err(e) => warn!(hash = short_hash(hash), error = %e, "source search failed"),
        }
    }

    async fn on_download_complete(&self, hash: &str) {
        let Ok(download) = self.downloads.get(hash).await else {
            return;
        };
        let info = download.info().await;

        match self.directory.add_file(&info.target).await {
            Ok((record, _)) if record.hash != info.hash => {
                warn!(
                    expected = short_hash(&info.hash),
                    actual = record.short_hash(),
                    file = %info.target.display(),
                    "downloaded content does not match its hash"
                );
            }
            Ok(_) => debug!(hash = short_hash(hash), "downloaded file shared"),
            Err(e) => warn!(file = %info.target.display(), error = %e, "cannot index downloaded file"),
        }

        self.emit(ProtocolEvent::FileComplete(FileCompleteEvent {
            hash: info.hash,
            file_name: info.file_name,
            path: info.target,
            size: info.size,
        }));
    }

    /// How long the liveness sweep waits between rounds
    pub(crate) fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.config.liveness_interval_secs.max(1))
    }
}

#[async_trait]
impl Provider for ClientNode {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    async fn identify(&self, _provider: Arc<dyn Provider>) -> RemoteResult<()> {
        Err(RemoteError::Unsupported("identify"))
    }

    async fn search_by_query(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()> {
        let matches = self.directory.search(query).await;
        debug!(search_id = id, query = query, matches = matches.len(), "answering search");
        if matches.is_empty() {
            return Ok(());
        }

        let me = self.as_provider()?;
        for record in matches {
            if let Err(e) = consumer.file_was_found(id, me.clone(), record).await {
                warn!(
                    search_id = id,
                    consumer = %consumer.peer_id(),
                    error = %e,
                    "consumer unreachable, search canceled"
                );
                break;
            }
        }
        Ok(())
    }

    async fn search(&self, _consumer: Arc<dyn Consumer>, _query: &str) -> RemoteResult<SearchId> {
        Err(RemoteError::Unsupported("search"))
    }

    async fn search_by_hash(&self, hash: &str, consumer: Arc<dyn Consumer>) -> RemoteResult<()> {
        self.offer(hash, consumer).await;
        Ok(())
    }

    async fn search_for_community(
        &self,
        _id: SearchId,
        _consumer: Arc<dyn Consumer>,
        _query: &str,
    ) -> RemoteResult<()> {
        Err(RemoteError::Unsupported("search_for_community"))
    }

    async fn get_file(&self, hash: &str, consumer: Arc<dyn Consumer>) -> RemoteResult<()> {
        self.offer(hash, consumer).await;
        Ok(())
    }
}

#[async_trait]
impl Consumer for ClientNode {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    async fn file_was_found(
        &self,
        id: SearchId,
        provider: Arc<dyn Provider>,
        record: FileRecord,
    ) -> RemoteResult<()> {
        self.emit(ProtocolEvent::FileFound(FileFoundEvent {
            search_id: id,
            hash: record.hash.clone(),
            file_name: record.name.clone(),
            size: record.size,
            provider: provider.peer_id(),
        }));
        self.replies.add_reply(id, provider, record).await;
        Ok(())
    }

    async fn here_is_file(&self, handle: Arc<dyn TransferHandle>) -> RemoteResult<()> {
        let hash = handle.hash();
        match self.downloads.add_handle(handle).await {
            Ok(HandleOutcome::Created) if self.config.auto_resume => {
                if let Err(e) = self.downloads.resume(&hash).await {
                    warn!(hash = short_hash(&hash), error = %e, "cannot start download");
                }
            }
            Ok(outcome) => {
                debug!(hash = short_hash(&hash), outcome = ?outcome, "handle received");
            }
            Err(e) => {
                warn!(hash = short_hash(&hash), error = %e, "handle ignored");
            }
        }
        Ok(())
    }

    async fn ping(&self) -> RemoteResult<()> {
        Ok(())
    }
}
