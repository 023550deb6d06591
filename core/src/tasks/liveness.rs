//! Upload liveness sweep

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, trace};

use crate::network::share::UploadManager;
use crate::protocol::ClientNode;

impl ClientNode {
    /// Periodically ping every running upload's consumer
    ///
    /// Dead consumers are evicted and their slots go to waiting uploads.
    pub(crate) async fn run_liveness_loop(
        uploads: Arc<UploadManager>,
        running: Arc<RwLock<bool>>,
        sweep_interval: Duration,
    ) {
        info!(interval_secs = sweep_interval.as_secs(), "liveness loop started");

        let mut interval = tokio::time::interval(sweep_interval);
        interval.tick().await; // Skip immediate tick

        loop {
            interval.tick().await;

            if !*running.read().await {
                break;
            }

            let evicted = uploads.sweep().await;
            if evicted > 0 {
                let still_running = uploads.running_count().await;
                info!(
                    evicted = evicted,
                    running = still_running,
                    "liveness sweep evicted uploads"
                );
            } else {
                trace!("liveness sweep: all consumers alive");
            }
        }

        info!("liveness loop stopped");
    }
}
