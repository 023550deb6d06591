//! Parallel multi-source strategy
//!
//! The file is split into fixed contiguous ranges when the download is
//! created. A coordinator task owns the range -> source assignment table and
//! is the only place sources are allocated. Each assigned range gets a
//! worker that fetches blocks from its source until the range is done, the
//! source fails, or the download leaves `Downloading`.
//!
//! A source serves at most one range at a time, so at most
//! `min(ranges, sources)` workers run concurrently.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

use super::state::{Download, DownloadStatus};
use crate::data::short_hash;
use crate::network::rpc::{HandleId, TransferHandle};

/// Why a range worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeOutcome {
    /// Range fully fetched
    Finished,
    /// Download left `Downloading` or hit a local error
    Stopped,
    /// The source failed and must be detached
    SourceFailed,
}

#[derive(Debug)]
struct RangeReport {
    range: usize,
    handle: HandleId,
    outcome: RangeOutcome,
}

/// Coordinator loop; runs until the download reaches a terminal state
pub(super) async fn run(download: Arc<Download>) {
    let range_count = download.ranges().await.len();
    let mut assignments: Vec<Option<HandleId>> = vec![None; range_count];
    let mut workers: JoinSet<RangeReport> = JoinSet::new();

    debug!(hash = short_hash(download.hash()), ranges = range_count, "parallel engine started");

    loop {
        let status = download.status().await;
        if status.is_terminal() {
            break;
        }
        if status == DownloadStatus::Downloading {
            if download.pending_ranges().await.is_empty() {
                download.settle().await;
                continue;
            }
            assign(&download, &mut assignments, &mut workers).await;
        }

        tokio::select! {
            biased;

            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                match joined {
                    Ok(report) => release(&download, &mut assignments, report).await,
                    Err(e) => {
                        error!(hash = short_hash(download.hash()), error = %e, "range worker crashed");
                        if workers.is_empty() {
                            assignments.iter_mut().for_each(|a| *a = None);
                        }
                    }
                }
            }

            _ = download.wake.notified() => {}
        }
    }

    // Dropping the set aborts anything still in flight
    workers.shutdown().await;
    debug!(hash = short_hash(download.hash()), "parallel engine stopped");
}

/// Give every idle, unfinished range the first unallocated source
async fn assign(
    download: &Arc<Download>,
    assignments: &mut [Option<HandleId>],
    workers: &mut JoinSet<RangeReport>,
) {
    let sources = download.sources().await;
    let pending = download.pending_ranges().await;

    for range in pending {
        if assignments[range].is_some() {
            continue;
        }
        let free = sources
            .iter()
            .find(|s| !assignments.contains(&Some(s.handle_id())));
        let Some(source) = free else {
            break;
        };

        assignments[range] = Some(source.handle_id());
        trace!(
            hash = short_hash(download.hash()),
            range = range,
            handle = source.handle_id(),
            "range assigned"
        );
        workers.spawn(fetch_range(download.clone(), range, source.clone()));
    }
}

async fn release(download: &Arc<Download>, assignments: &mut [Option<HandleId>], report: RangeReport) {
    if let Some(slot) = assignments.get_mut(report.range) {
        *slot = None;
    }
    match report.outcome {
        RangeOutcome::Finished => {
            trace!(hash = short_hash(download.hash()), range = report.range, "range finished");
        }
        RangeOutcome::Stopped => {}
        RangeOutcome::SourceFailed => {
            download.remove_source(report.handle).await;
        }
    }
}

/// Fetch one range from one source, block by block
async fn fetch_range(download: Arc<Download>, range: usize, source: Arc<dyn TransferHandle>) -> RangeReport {
    let handle = source.handle_id();
    let report = |outcome| RangeReport { range, handle, outcome };

    loop {
        if download.status().await != DownloadStatus::Downloading {
            return report(RangeOutcome::Stopped);
        }
        let Some((offset, len)) = download.next_block(range).await else {
            return report(RangeOutcome::Finished);
        };

        let started = Instant::now();
        let mut bytes = match source.read_range(offset, len).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                warn!(hash = short_hash(download.hash()), range = range, offset = offset, "source returned no data");
                return report(RangeOutcome::SourceFailed);
            }
            Err(e) => {
                warn!(hash = short_hash(download.hash()), range = range, error = %e, "source failed mid-range");
                return report(RangeOutcome::SourceFailed);
            }
        };
        bytes.truncate(len);

        match download.write_block(offset, &bytes).await {
            Ok(true) => {
                download
                    .record_progress(range, bytes.len(), started.elapsed())
                    .await;
            }
            Ok(false) => return report(RangeOutcome::Stopped),
            Err(e) => {
                download.fail_local(e).await;
                return report(RangeOutcome::Stopped);
            }
        }
    }
}
