//! Network layer for Shoal
//!
//! Contains:
//! - rpc: remote capability traits (Provider, Consumer, TransferHandle, Terminal)
//! - search: request registry, fan-out coordinator, reply aggregation
//! - federation: the server-to-server mesh
//! - share: uploads and downloads
//!
//! The transport that carries calls between peers lives outside this crate;
//! everything here talks to peers through `Arc<dyn ...>` capabilities.

pub mod federation;
pub mod rpc;
pub mod search;
pub mod share;

// Re-export commonly used items
pub use federation::{FederationError, FederationNode, TerminalResolver};
pub use rpc::{
    Consumer, HandleId, PeerId, Provider, RemoteError, RemoteResult, SearchId, Terminal,
    TransferHandle,
};
pub use search::{ReplyAggregator, RequestRegistry, SearchCoordinator};
pub use share::{DownloadManager, LocalHandle, UploadManager};
