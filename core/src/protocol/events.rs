//! Protocol events for the application layer
//!
//! Emitted by a client node so a front end can show search results and
//! download progress without polling.

use std::path::PathBuf;

use crate::network::rpc::{PeerId, SearchId};
use crate::network::share::DownloadStatus;

/// Events emitted by a client node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A provider reported a file matching one of our searches
    FileFound(FileFoundEvent),
    /// A download changed status
    DownloadChanged(DownloadChangedEvent),
    /// A download finished writing its last byte
    FileComplete(FileCompleteEvent),
}

/// Event: a search reply arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFoundEvent {
    pub search_id: SearchId,
    pub hash: String,
    pub file_name: String,
    pub size: u64,
    /// Who offered it
    pub provider: PeerId,
}

/// Event: download status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadChangedEvent {
    pub hash: String,
    pub status: DownloadStatus,
}

/// Event: download completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCompleteEvent {
    pub hash: String,
    pub file_name: String,
    /// Where the file was written
    pub path: PathBuf,
    pub size: u64,
}
