//! File transfer
//!
//! Serving side:
//! - `handle`: `LocalHandle`, a transfer handle over a shared file
//! - `upload`: bounded admission of uploads with a FIFO waiting queue
//!
//! Receiving side:
//! - `download`: the download state machine, both strategies, and the
//!   manager that owns them

pub mod download;
pub mod handle;
pub mod upload;

pub use download::{
    Download, DownloadError, DownloadEvent, DownloadInfo, DownloadManager, DownloadSettings,
    DownloadStatus, DownloadStrategy, HandleOutcome,
};
pub use handle::LocalHandle;
pub use upload::{Upload, UploadError, UploadInfo, UploadManager, DEFAULT_MAX_UPLOADS};
