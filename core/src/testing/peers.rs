//! Fake peers
//!
//! In-process stand-ins for remote consumers and providers. Every call is
//! recorded, and `set_reachable(false)` makes every remote call fail the way
//! a dead transport would.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::data::FileRecord;
use crate::network::rpc::{
    generate_search_id, Consumer, PeerId, Provider, RemoteError, RemoteResult, SearchId,
    TransferHandle,
};

fn unreachable(id: PeerId) -> RemoteError {
    RemoteError::Unreachable(format!("peer {} is down", id))
}

/// A consumer that records what it receives
pub struct FakeConsumer {
    id: PeerId,
    reachable: AtomicBool,
    pings: AtomicUsize,
    delivery_delay_ms: AtomicU64,
    found: Mutex<Vec<(SearchId, PeerId, FileRecord)>>,
    handles: Mutex<Vec<Arc<dyn TransferHandle>>>,
}

impl FakeConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: PeerId::random(),
            reachable: AtomicBool::new(true),
            pings: AtomicUsize::new(0),
            delivery_delay_ms: AtomicU64::new(0),
            found: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.id
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Sleep inside `here_is_file` before accepting the handle
    pub fn set_delivery_delay(&self, delay: Duration) {
        self.delivery_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check(&self) -> RemoteResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unreachable(self.id))
        }
    }

    /// Search replies received: (search id, provider, record)
    pub async fn found(&self) -> Vec<(SearchId, PeerId, FileRecord)> {
        self.found.lock().await.clone()
    }

    /// Transfer handles delivered so far
    pub async fn handles(&self) -> Vec<Arc<dyn TransferHandle>> {
        self.handles.lock().await.clone()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Consumer for FakeConsumer {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    async fn file_was_found(
        &self,
        id: SearchId,
        provider: Arc<dyn Provider>,
        record: FileRecord,
    ) -> RemoteResult<()> {
        self.check()?;
        self.found.lock().await.push((id, provider.peer_id(), record));
        Ok(())
    }

    async fn here_is_file(&self, handle: Arc<dyn TransferHandle>) -> RemoteResult<()> {
        let delay = self.delivery_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        self.handles.lock().await.push(handle);
        Ok(())
    }

    async fn ping(&self) -> RemoteResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check()
    }
}

/// A provider (and consumer) that records every search it is asked to run
///
/// It never answers searches; tests assert on what reached it.
pub struct FakeProvider {
    id: PeerId,
    reachable: AtomicBool,
    identified: Mutex<Vec<PeerId>>,
    query_searches: Mutex<Vec<(SearchId, String)>>,
    hash_searches: Mutex<Vec<String>>,
    community_searches: Mutex<Vec<(SearchId, String)>>,
    file_requests: Mutex<Vec<String>>,
    found: Mutex<Vec<(SearchId, FileRecord)>>,
    handles: Mutex<Vec<Arc<dyn TransferHandle>>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: PeerId::random(),
            reachable: AtomicBool::new(true),
            identified: Mutex::new(Vec::new()),
            query_searches: Mutex::new(Vec::new()),
            hash_searches: Mutex::new(Vec::new()),
            community_searches: Mutex::new(Vec::new()),
            file_requests: Mutex::new(Vec::new()),
            found: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.id
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// The consumer side of this peer
    pub fn as_consumer(self: &Arc<Self>) -> Arc<dyn Consumer> {
        self.clone()
    }

    fn check(&self) -> RemoteResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unreachable(self.id))
        }
    }

    pub async fn identified(&self) -> Vec<PeerId> {
        self.identified.lock().await.clone()
    }

    pub async fn query_searches(&self) -> Vec<(SearchId, String)> {
        self.query_searches.lock().await.clone()
    }

    pub async fn hash_searches(&self) -> Vec<String> {
        self.hash_searches.lock().await.clone()
    }

    pub async fn community_searches(&self) -> Vec<(SearchId, String)> {
        self.community_searches.lock().await.clone()
    }

    pub async fn file_requests(&self) -> Vec<String> {
        self.file_requests.lock().await.clone()
    }

    pub async fn found(&self) -> Vec<(SearchId, FileRecord)> {
        self.found.lock().await.clone()
    }

    pub async fn handles(&self) -> Vec<Arc<dyn TransferHandle>> {
        self.handles.lock().await.clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    async fn identify(&self, provider: Arc<dyn Provider>) -> RemoteResult<()> {
        self.check()?;
        self.identified.lock().await.push(provider.peer_id());
        Ok(())
    }

    async fn search_by_query(
        &self,
        id: SearchId,
        _consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()> {
        self.check()?;
        self.query_searches.lock().await.push((id, query.to_string()));
        Ok(())
    }

    async fn search(&self, _consumer: Arc<dyn Consumer>, query: &str) -> RemoteResult<SearchId> {
        self.check()?;
        let id = generate_search_id();
        self.query_searches.lock().await.push((id, query.to_string()));
        Ok(id)
    }

    async fn search_by_hash(&self, hash: &str, _consumer: Arc<dyn Consumer>) -> RemoteResult<()> {
        self.check()?;
        self.hash_searches.lock().await.push(hash.to_string());
        Ok(())
    }

    async fn search_for_community(
        &self,
        id: SearchId,
        _consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()> {
        self.check()?;
        self.community_searches.lock().await.push((id, query.to_string()));
        Ok(())
    }

    async fn get_file(&self, hash: &str, _consumer: Arc<dyn Consumer>) -> RemoteResult<()> {
        self.check()?;
        self.file_requests.lock().await.push(hash.to_string());
        Ok(())
    }
}

#[async_trait]
impl Consumer for FakeProvider {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    async fn file_was_found(
        &self,
        id: SearchId,
        _provider: Arc<dyn Provider>,
        record: FileRecord,
    ) -> RemoteResult<()> {
        self.check()?;
        self.found.lock().await.push((id, record));
        Ok(())
    }

    async fn here_is_file(&self, handle: Arc<dyn TransferHandle>) -> RemoteResult<()> {
        self.check()?;
        self.handles.lock().await.push(handle);
        Ok(())
    }

    async fn ping(&self) -> RemoteResult<()> {
        self.check()
    }
}
