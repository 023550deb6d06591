//! Upload Admission Manager
//!
//! Bounded concurrent delivery of transfer handles to consumers:
//! - at most `max_uploads` uploads are running at once
//! - excess requests wait in FIFO order
//! - a waiting upload only advances when a running slot is released
//!   (liveness eviction, hash invalidation, or a failed delivery)

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::handle::LocalHandle;
use crate::data::short_hash;
use crate::network::rpc::{Consumer, HandleId, PeerId, TransferHandle};

/// Default cap on concurrently running uploads
pub const DEFAULT_MAX_UPLOADS: usize = 5;

/// Errors from upload administration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// No running or waiting upload serves this hash
    UnknownHash(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::UnknownHash(hash) => write!(f, "no upload for hash {}", short_hash(hash)),
        }
    }
}

impl std::error::Error for UploadError {}

/// A handle bound for one consumer
#[derive(Clone)]
pub struct Upload {
    pub consumer: Arc<dyn Consumer>,
    pub handle: Arc<LocalHandle>,
}

impl Upload {
    fn info(&self) -> UploadInfo {
        UploadInfo {
            consumer: self.consumer.peer_id(),
            handle: self.handle.handle_id(),
            hash: self.handle.record().hash.clone(),
            file_name: self.handle.record().name.clone(),
        }
    }
}

/// Snapshot of an upload for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub consumer: PeerId,
    pub handle: HandleId,
    pub hash: String,
    pub file_name: String,
}

/// Where an upload that finds every slot taken goes in the waiting queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requeue {
    /// New request: join the back
    Back,
    /// Promoted head that lost its slot: keep its place
    Front,
}

#[derive(Default)]
struct Queues {
    running: Vec<Upload>,
    waiting: VecDeque<Upload>,
    /// Uploads holding a slot while their consumer is being handed the file
    delivering: Vec<Upload>,
}

impl Queues {
    fn occupied(&self) -> usize {
        self.running.len() + self.delivering.len()
    }
}

/// Admits uploads up to a fixed concurrency cap
pub struct UploadManager {
    max_uploads: usize,
    queues: Mutex<Queues>,
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadManager")
            .field("max_uploads", &self.max_uploads)
            .finish_non_exhaustive()
    }
}

impl Default for UploadManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOADS)
    }
}

impl UploadManager {
    pub fn new(max_uploads: usize) -> Self {
        Self {
            max_uploads: max_uploads.max(1),
            queues: Mutex::new(Queues::default()),
        }
    }

    pub fn max_uploads(&self) -> usize {
        self.max_uploads
    }

    /// Deliver `handle` to `consumer` now, or queue it if every slot is taken
    ///
    /// An unreachable consumer is dropped without queueing; the slot it
    /// held goes to the next waiting upload.
    pub async fn deliver_file(&self, consumer: Arc<dyn Consumer>, handle: Arc<LocalHandle>) {
        self.admit(Upload { consumer, handle }, Requeue::Back).await;
    }

    async fn admit(&self, upload: Upload, requeue: Requeue) {
        let mut next = Some((upload, requeue));

        while let Some((upload, requeue)) = next.take() {
            {
                let mut queues = self.queues.lock().await;
                if queues.occupied() >= self.max_uploads {
                    debug!(
                        hash = upload.handle.record().short_hash(),
                        consumer = %upload.consumer.peer_id(),
                        waiting = queues.waiting.len() + 1,
                        "upload slots full, queueing"
                    );
                    match requeue {
                        Requeue::Back => queues.waiting.push_back(upload),
                        Requeue::Front => queues.waiting.push_front(upload),
                    }
                    return;
                }
                queues.delivering.push(upload.clone());
            }

            let handle: Arc<dyn TransferHandle> = upload.handle.clone();
            let delivered = upload.consumer.here_is_file(handle).await;

            let mut queues = self.queues.lock().await;
            let id = upload.handle.handle_id();
            queues.delivering.retain(|u| u.handle.handle_id() != id);
            match delivered {
                Ok(()) if upload.handle.is_invalidated() => {
                    debug!(
                        hash = upload.handle.record().short_hash(),
                        consumer = %upload.consumer.peer_id(),
                        "upload invalidated during delivery"
                    );
                    next = queues.waiting.pop_front().map(|u| (u, Requeue::Front));
                }
                Ok(()) => {
                    info!(
                        hash = upload.handle.record().short_hash(),
                        consumer = %upload.consumer.peer_id(),
                        running = queues.running.len() + 1,
                        "upload started"
                    );
                    queues.running.push(upload);
                }
                Err(e) => {
                    warn!(
                        consumer = %upload.consumer.peer_id(),
                        error = %e,
                        "consumer unreachable, dropping upload"
                    );
                    next = queues.waiting.pop_front().map(|u| (u, Requeue::Front));
                }
            }
        }
    }

    /// Move the head of the waiting queue into a free slot
    async fn promote(&self) {
        let head = self.queues.lock().await.waiting.pop_front();
        if let Some(upload) = head {
            debug!(hash = upload.handle.record().short_hash(), "promoting waiting upload");
            self.admit(upload, Requeue::Front).await;
        }
    }

    /// Probe every running consumer; evict and replace the dead ones
    ///
    /// Returns the number of evicted uploads.
    pub async fn sweep(&self) -> usize {
        let running: Vec<Upload> = self.queues.lock().await.running.clone();

        let mut dead: Vec<HandleId> = Vec::new();
        for upload in &running {
            if let Err(e) = upload.consumer.ping().await {
                warn!(
                    consumer = %upload.consumer.peer_id(),
                    hash = upload.handle.record().short_hash(),
                    error = %e,
                    "upload consumer failed liveness probe"
                );
                upload.handle.invalidate();
                dead.push(upload.handle.handle_id());
            }
        }

        let evicted = {
            let mut queues = self.queues.lock().await;
            let before = queues.running.len();
            queues
                .running
                .retain(|u| !dead.contains(&u.handle.handle_id()));
            before - queues.running.len()
        };

        for _ in 0..evicted {
            self.promote().await;
        }
        evicted
    }

    /// Invalidate every upload serving `hash`
    ///
    /// Each invalidated running upload frees a slot for one waiting upload.
    /// Uploads still being delivered are invalidated in place and release
    /// their slot when the delivery returns.
    pub async fn invalidate(&self, hash: &str) -> Result<usize, UploadError> {
        let (removed_running, removed_waiting, in_flight) = {
            let mut queues = self.queues.lock().await;

            let in_flight: Vec<Upload> = queues
                .delivering
                .iter()
                .filter(|u| u.handle.record().hash == hash)
                .cloned()
                .collect();
            for upload in &in_flight {
                upload.handle.invalidate();
            }

            let (matching, kept): (Vec<Upload>, Vec<Upload>) = queues
                .running
                .drain(..)
                .partition(|u| u.handle.record().hash == hash);
            queues.running = kept;

            let (matching_waiting, kept_waiting): (VecDeque<Upload>, VecDeque<Upload>) = queues
                .waiting
                .drain(..)
                .partition(|u| u.handle.record().hash == hash);
            queues.waiting = kept_waiting;

            (matching, matching_waiting, in_flight.len())
        };

        if removed_running.is_empty() && removed_waiting.is_empty() && in_flight == 0 {
            return Err(UploadError::UnknownHash(hash.to_string()));
        }

        for upload in removed_running.iter().chain(removed_waiting.iter()) {
            upload.handle.invalidate();
        }
        info!(
            hash = short_hash(hash),
            running = removed_running.len(),
            waiting = removed_waiting.len(),
            delivering = in_flight,
            "uploads invalidated"
        );

        for _ in 0..removed_running.len() {
            self.promote().await;
        }
        Ok(removed_running.len() + removed_waiting.len() + in_flight)
    }

    pub async fn running(&self) -> Vec<UploadInfo> {
        self.queues.lock().await.running.iter().map(Upload::info).collect()
    }

    pub async fn waiting(&self) -> Vec<UploadInfo> {
        self.queues.lock().await.waiting.iter().map(Upload::info).collect()
    }

    /// Every handle held by a running or waiting upload
    pub async fn handles(&self) -> Vec<Arc<LocalHandle>> {
        let queues = self.queues.lock().await;
        queues
            .running
            .iter()
            .chain(queues.waiting.iter())
            .map(|u| u.handle.clone())
            .collect()
    }

    pub async fn running_count(&self) -> usize {
        self.queues.lock().await.running.len()
    }

    pub async fn waiting_count(&self) -> usize {
        self.queues.lock().await.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FileRecord;
    use crate::testing::FakeConsumer;

    fn handle(hash: &str) -> Arc<LocalHandle> {
        Arc::new(LocalHandle::new(FileRecord::new(
            format!("{}.bin", hash),
            hash,
            10,
            format!("/shared/{}.bin", hash),
        )))
    }

    #[tokio::test]
    async fn test_cap_plus_one_queues_one() {
        let uploads = UploadManager::new(5);
        for i in 0..6 {
            uploads.deliver_file(FakeConsumer::new(), handle(&format!("h{}", i))).await;
        }
        assert_eq!(uploads.running_count().await, 5);
        assert_eq!(uploads.waiting_count().await, 1);

        uploads.invalidate("h2").await.unwrap();
        assert_eq!(uploads.running_count().await, 5);
        assert_eq!(uploads.waiting_count().await, 0);
        let running: Vec<String> = uploads.running().await.into_iter().map(|u| u.hash).collect();
        assert!(running.contains(&"h5".to_string()));
        assert!(!running.contains(&"h2".to_string()));
    }

    #[tokio::test]
    async fn test_waiting_upload_not_delivered_until_promoted() {
        let uploads = UploadManager::new(1);
        let first = FakeConsumer::new();
        let second = FakeConsumer::new();
        uploads.deliver_file(first.clone(), handle("a")).await;
        uploads.deliver_file(second.clone(), handle("b")).await;

        assert_eq!(first.handles().await.len(), 1);
        assert!(second.handles().await.is_empty());

        uploads.invalidate("a").await.unwrap();
        assert_eq!(second.handles().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_consumer_dropped() {
        let uploads = UploadManager::new(2);
        let gone = FakeConsumer::new();
        gone.set_reachable(false);
        uploads.deliver_file(gone, handle("a")).await;
        assert_eq!(uploads.running_count().await, 0);
        assert_eq!(uploads.waiting_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_dead_and_promotes() {
        let uploads = UploadManager::new(2);
        let alive = FakeConsumer::new();
        let dying = FakeConsumer::new();
        let queued = FakeConsumer::new();
        let dying_handle = handle("b");

        uploads.deliver_file(alive.clone(), handle("a")).await;
        uploads.deliver_file(dying.clone(), dying_handle.clone()).await;
        uploads.deliver_file(queued.clone(), handle("c")).await;
        assert_eq!(uploads.waiting_count().await, 1);

        dying.set_reachable(false);
        assert_eq!(uploads.sweep().await, 1);

        assert!(dying_handle.is_invalidated());
        assert_eq!(uploads.running_count().await, 2);
        assert_eq!(uploads.waiting_count().await, 0);
        assert_eq!(queued.handles().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_hash() {
        let uploads = UploadManager::default();
        assert_eq!(
            uploads.invalidate("nope").await,
            Err(UploadError::UnknownHash("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_invalidate_covers_waiting_uploads() {
        let uploads = UploadManager::new(1);
        let waiting_handle = handle("x");
        uploads.deliver_file(FakeConsumer::new(), handle("y")).await;
        uploads.deliver_file(FakeConsumer::new(), waiting_handle.clone()).await;

        assert_eq!(uploads.handles().await.len(), 2);
        assert_eq!(uploads.invalidate("x").await, Ok(1));
        assert_eq!(uploads.handles().await.len(), 1);
        assert!(waiting_handle.is_invalidated());
        assert_eq!(uploads.waiting_count().await, 0);
        assert_eq!(uploads.running_count().await, 1);
    }

    #[tokio::test]
    async fn test_promoted_upload_keeps_its_place() {
        let uploads = UploadManager::new(1);
        uploads.deliver_file(FakeConsumer::new(), handle("a")).await;
        uploads.deliver_file(FakeConsumer::new(), handle("b")).await;

        // Head leaves the queue, then a newcomer grabs the freed slot first
        let head = uploads.queues.lock().await.waiting.pop_front().unwrap();
        uploads.queues.lock().await.running.clear();
        uploads.deliver_file(FakeConsumer::new(), handle("c")).await;
        uploads.admit(head, Requeue::Front).await;
        uploads.deliver_file(FakeConsumer::new(), handle("d")).await;

        let waiting: Vec<String> = uploads.waiting().await.into_iter().map(|u| u.hash).collect();
        assert_eq!(waiting, vec!["b".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn test_invalidate_reaches_upload_in_delivery() {
        let uploads = Arc::new(UploadManager::new(2));
        let slow = FakeConsumer::new();
        slow.set_delivery_delay(std::time::Duration::from_millis(100));
        let in_flight = handle("h");

        let delivery = {
            let uploads = uploads.clone();
            let in_flight = in_flight.clone();
            tokio::spawn(async move { uploads.deliver_file(slow, in_flight).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(uploads.invalidate("h").await, Ok(1));
        delivery.await.unwrap();

        assert!(in_flight.is_invalidated());
        assert_eq!(uploads.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_promotion_falls_through_to_next() {
        let uploads = UploadManager::new(1);
        let gone = FakeConsumer::new();
        let next = FakeConsumer::new();
        uploads.deliver_file(FakeConsumer::new(), handle("a")).await;
        uploads.deliver_file(gone.clone(), handle("b")).await;
        uploads.deliver_file(next.clone(), handle("c")).await;

        gone.set_reachable(false);
        uploads.invalidate("a").await.unwrap();

        assert_eq!(uploads.running().await[0].hash, "c");
        assert_eq!(next.handles().await.len(), 1);
    }
}
