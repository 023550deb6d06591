//! Background tasks for a client node
//!
//! This module contains the long-running background tasks:
//! - Liveness sweep (evicts uploads whose consumer stopped answering)
//! - Source search (reacts to download status changes, asks the server
//!   for more sources when a download runs dry)

mod liveness;
mod source_search;

use std::sync::Arc;

use tracing::info;

use crate::protocol::ClientNode;

impl ClientNode {
    /// Start background tasks (liveness sweep, source search)
    pub(crate) async fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.write().await;

        // 1. Liveness sweep over running uploads
        let uploads = self.uploads.clone();
        let running = self.running.clone();
        let liveness_interval = self.liveness_interval();

        let liveness_task = tokio::spawn(async move {
            Self::run_liveness_loop(uploads, running, liveness_interval).await;
        });
        tasks.push(liveness_task);

        // 2. Source search on the download event bus
        let node = Arc::downgrade(self);
        let download_events = self.downloads.subscribe();
        let running = self.running.clone();

        let source_task = tokio::spawn(async move {
            Self::run_source_search_loop(node, download_events, running).await;
        });
        tasks.push(source_task);

        info!("background tasks started");
    }
}
