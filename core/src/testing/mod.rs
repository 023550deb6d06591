//! Testing utilities for Shoal
//!
//! Provides in-process fakes for every remote capability so the search,
//! federation, and transfer layers can be exercised without a transport.
//!
//! # Example
//!
//! ```ignore
//! let consumer = FakeConsumer::new();
//! let provider = FakeProvider::new();
//! coordinator.on_provider_identified(provider.clone()).await;
//!
//! coordinator.search_by_query(1, consumer.clone(), "song").await?;
//! assert_eq!(provider.query_searches().await, vec![(1, "song".to_string())]);
//!
//! // Simulate the peer disappearing
//! provider.set_reachable(false);
//! ```

pub mod federation;
pub mod handle;
pub mod peers;

use std::sync::Arc;
use std::time::Duration;

pub use federation::TerminalDirectory;
pub use handle::MemoryHandle;
pub use peers::{FakeConsumer, FakeProvider};

use crate::network::share::{Download, DownloadStatus};

/// How long `wait_for_status` waits before giving up
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll until `download` reaches `status`
///
/// Panics after [`WAIT_TIMEOUT`], reporting the last status seen.
pub async fn wait_for_status(download: &Arc<Download>, status: DownloadStatus) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let current = download.status().await;
        if current == status {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "download {} stuck in {} waiting for {}",
                download.file_name(),
                current,
                status
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
