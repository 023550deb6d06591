//! Sequential strategy
//!
//! One source at a time, always the least recently added. Blocks are read
//! front to back and written as they arrive; a failing source is dropped and
//! the next one continues from the same offset.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::state::{Download, DownloadStatus};
use crate::data::short_hash;

/// The only range of a sequential download
const RANGE: usize = 0;

/// Engine loop; runs until the download reaches a terminal state
pub(super) async fn run(download: Arc<Download>) {
    debug!(hash = short_hash(download.hash()), "sequential engine started");

    loop {
        match download.status().await {
            status if status.is_terminal() => break,
            DownloadStatus::Downloading => {}
            _ => {
                download.wake.notified().await;
                continue;
            }
        }

        let Some(source) = download.first_source().await else {
            download.wake.notified().await;
            continue;
        };
        let Some((offset, len)) = download.next_block(RANGE).await else {
            // Everything fetched; settle the status
            download.settle().await;
            continue;
        };

        let started = Instant::now();
        match source.read_range(offset, len).await {
            Ok(mut bytes) if !bytes.is_empty() => {
                bytes.truncate(len);
                match download.write_block(offset, &bytes).await {
                    Ok(true) => {
                        trace!(hash = short_hash(download.hash()), offset = offset, len = bytes.len(), "block written");
                        download
                            .record_progress(RANGE, bytes.len(), started.elapsed())
                            .await;
                    }
                    Ok(false) => {}
                    Err(e) => download.fail_local(e).await,
                }
            }
            Ok(_) => {
                warn!(hash = short_hash(download.hash()), offset = offset, "source returned no data, dropping it");
                download.remove_source(source.handle_id()).await;
            }
            Err(e) => {
                warn!(hash = short_hash(download.hash()), error = %e, "source failed, dropping it");
                download.remove_source(source.handle_id()).await;
            }
        }
    }

    debug!(hash = short_hash(download.hash()), "sequential engine stopped");
}

#[cfg(test)]
mod tests {
    use super::super::state::{DownloadEvent, DownloadSettings, DownloadStrategy};
    use super::*;
    use crate::network::rpc::TransferHandle;
    use crate::testing::{wait_for_status, MemoryHandle};
    use tokio::sync::broadcast;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    async fn sequential(dir: &std::path::Path, handle: Arc<MemoryHandle>) -> Arc<Download> {
        let settings = DownloadSettings::new(dir)
            .with_strategy(DownloadStrategy::Sequential)
            .with_block_size(16);
        let (events, _) = broadcast::channel::<DownloadEvent>(64);
        Download::create(handle, &settings, events).await
    }

    #[tokio::test]
    async fn test_downloads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(1000);
        let download = sequential(dir.path(), MemoryHandle::new("f.bin", data.clone())).await;

        download.resume().await;
        wait_for_status(&download, DownloadStatus::Completed).await;

        assert_eq!(std::fs::read(download.target()).unwrap(), data);
        assert_eq!(download.downloaded().await, 1000);
        assert_eq!(download.progress().await, 100.0);
    }

    #[tokio::test]
    async fn test_failover_keeps_progress() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(500);
        let flaky = MemoryHandle::new("f.bin", data.clone());
        flaky.fail_after_reads(5);
        let backup = MemoryHandle::new_with_hash("f.bin", data.clone(), &flaky.hash());

        let download = sequential(dir.path(), flaky.clone()).await;
        download.add_source(backup.clone()).await;
        download.resume().await;
        wait_for_status(&download, DownloadStatus::Completed).await;

        assert_eq!(std::fs::read(download.target()).unwrap(), data);
        assert_eq!(download.source_count().await, 1);
        assert_eq!(backup.served_from(), Some(80));
    }

    #[tokio::test]
    async fn test_lone_failing_source_goes_dormant() {
        let dir = tempfile::tempdir().unwrap();
        let handle = MemoryHandle::new("f.bin", payload(100));
        handle.set_reachable(false);

        let download = sequential(dir.path(), handle).await;
        download.resume().await;
        wait_for_status(&download, DownloadStatus::NoTransfers).await;
        assert_eq!(download.source_count().await, 0);
    }

    #[tokio::test]
    async fn test_resumes_from_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(64);
        std::fs::write(dir.path().join("f.bin"), &data[..32]).unwrap();

        let handle = MemoryHandle::new("f.bin", data.clone());
        let download = sequential(dir.path(), handle.clone()).await;
        assert_eq!(download.downloaded().await, 32);

        download.resume().await;
        wait_for_status(&download, DownloadStatus::Completed).await;
        assert_eq!(std::fs::read(download.target()).unwrap(), data);
        assert_eq!(handle.served_from(), Some(32));
    }
}
