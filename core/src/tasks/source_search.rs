//! Source search hook
//!
//! Follows the download event bus. A download that was resumed without
//! sources enters `Searching`; the client then asks its server for more
//! providers of that hash. Terminal downloads are reaped here too.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{info, trace, warn};

use crate::data::short_hash;
use crate::network::share::DownloadEvent;
use crate::protocol::ClientNode;

impl ClientNode {
    /// Run the source search loop until the node stops or is dropped
    pub(crate) async fn run_source_search_loop(
        node: Weak<ClientNode>,
        mut events: broadcast::Receiver<DownloadEvent>,
        running: Arc<RwLock<bool>>,
    ) {
        info!("source search loop started");

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "source search loop lagged behind download events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if !*running.read().await {
                break;
            }
            let Some(node) = node.upgrade() else {
                break;
            };

            trace!(hash = short_hash(&event.hash), status = %event.status, "download event");
            node.on_download_event(event).await;
        }

        info!("source search loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use rusqlite::Connection;

    use crate::data::{
        save_downloads, start_memory_db, Blake3Hasher, ContentHasher, DownloadRecord, RangeRecord,
    };
    use crate::network::rpc::Provider;
    use crate::network::share::DownloadStatus;
    use crate::protocol::{ClientNode, ProtocolConfig, ServerNode};
    use crate::testing::{FakeProvider, TerminalDirectory, WAIT_TIMEOUT};

    /// A database holding one saved download with no progress
    fn db_with_saved(hash: &str, target: &Path, size: u64, strategy: &str) -> Connection {
        let mut db = start_memory_db().unwrap();
        let record = DownloadRecord {
            hash: hash.to_string(),
            file_name: target.file_name().unwrap().to_string_lossy().into_owned(),
            target_path: target.to_path_buf(),
            size,
            downloaded: 0,
            strategy: strategy.to_string(),
            status: DownloadStatus::Paused.code(),
            ranges: vec![RangeRecord { start: 0, end: size, next: 0 }],
        };
        save_downloads(&mut db, &[record]).unwrap();
        db
    }

    fn server() -> std::sync::Arc<ServerNode> {
        ServerNode::new(&ProtocolConfig::default(), TerminalDirectory::new())
    }

    #[tokio::test]
    async fn test_searching_download_finds_new_source() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"restored content that a seeder still holds".to_vec();
        let hash = Blake3Hasher.hash_bytes(&content);

        let seeder_dir = dir.path().join("seeder");
        std::fs::create_dir_all(&seeder_dir).unwrap();
        std::fs::write(seeder_dir.join("notes.txt"), &content).unwrap();
        let seeder = ClientNode::start_with_db(
            ProtocolConfig::for_testing(&seeder_dir),
            start_memory_db().unwrap(),
        )
        .await
        .unwrap();

        let leecher_dir = dir.path().join("leecher");
        let target = leecher_dir.join("notes.txt");
        let db = db_with_saved(&hash, &target, content.len() as u64, "sequential");
        let leecher = ClientNode::start_with_db(ProtocolConfig::for_testing(&leecher_dir), db)
            .await
            .unwrap();
        assert_eq!(leecher.downloads().await[0].status, DownloadStatus::NoTransfers);

        let server = server();
        seeder.connect(server.clone()).await.unwrap();
        leecher.connect(server.clone()).await.unwrap();

        assert_eq!(leecher.resume(&hash).await.unwrap(), DownloadStatus::Searching);

        tokio::time::timeout(WAIT_TIMEOUT, async {
            while !leecher.downloads().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), content);
        assert_eq!(seeder.uploads().await.len(), 1);
    }

    #[tokio::test]
    async fn test_source_search_reaches_attached_providers() {
        let dir = tempfile::tempdir().unwrap();
        let hash = "ef".repeat(32);
        let db = db_with_saved(&hash, &dir.path().join("rare.bin"), 10, "parallel");
        let node = ClientNode::start_with_db(ProtocolConfig::for_testing(dir.path()), db)
            .await
            .unwrap();

        let server = server();
        let other = FakeProvider::new();
        server.identify(other.clone()).await.unwrap();
        node.connect(server.clone()).await.unwrap();

        node.resume(&hash).await.unwrap();
        tokio::time::timeout(WAIT_TIMEOUT, async {
            while other.hash_searches().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(other.hash_searches().await, vec![hash]);
    }

    #[tokio::test]
    async fn test_searching_without_server_stays_searching() {
        let dir = tempfile::tempdir().unwrap();
        let hash = "cd".repeat(32);
        let db = db_with_saved(&hash, &dir.path().join("lost.bin"), 10, "parallel");
        let node = ClientNode::start_with_db(ProtocolConfig::for_testing(dir.path()), db)
            .await
            .unwrap();

        assert_eq!(node.resume(&hash).await.unwrap(), DownloadStatus::Searching);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(node.downloads().await[0].status, DownloadStatus::Searching);
    }
}
