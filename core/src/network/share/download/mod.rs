//! Download engine
//!
//! - `state`: the per-file state machine, sources, and range progress
//! - `sequential`: single-source, front-to-back strategy
//! - `parallel`: fixed ranges fetched concurrently from distinct sources
//! - `manager`: every download of a client, solicitations, persistence

pub mod manager;
mod parallel;
mod sequential;
pub mod state;

pub use manager::{DownloadError, DownloadManager, HandleOutcome};
pub use state::{
    split_ranges, ByteRange, Download, DownloadEvent, DownloadInfo, DownloadSettings,
    DownloadStatus, DownloadStrategy, DEFAULT_BLOCK_SIZE, DEFAULT_RANGE_COUNT,
};
