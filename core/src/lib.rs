//! Shoal Core
//!
//! Search and transfer engine of the Shoal file-sharing overlay.
//!
//! This is the foundation crate that provides:
//! - Distributed search: clients attach to servers, servers fan searches
//!   out to their clients and flood them through a server federation
//! - Reply aggregation on the consumer side
//! - Bounded upload admission with liveness probing
//! - Resumable downloads (sequential or parallel ranges) from several sources
//!
//! # Module Structure
//!
//! - `protocol/`: Public interface (ClientNode, ServerNode, config, events)
//! - `tasks/`: Background automation (liveness sweep, source search)
//! - `network/`: Remote capability traits, search, federation, transfers
//! - `data/`: File records, hashing, content directory, SQLite persistence
//! - `testing/`: In-process fake peers and federation resolver
//!
//! # Quick Start
//!
//! ```ignore
//! use shoal_core::{ClientNode, ProtocolConfig, ServerNode};
//! use shoal_core::testing::TerminalDirectory;
//!
//! let server = ServerNode::new(&ProtocolConfig::default(), TerminalDirectory::new());
//!
//! let client = ClientNode::start(ProtocolConfig::default()).await?;
//! client.connect(server).await?;
//!
//! let id = client.search("holiday").await?;
//! for hash in client.results(id).await?.keys() {
//!     client.download(id, hash).await?;
//! }
//!
//! let mut events = client.events().await.unwrap();
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

// Public interface
pub mod protocol;

// Internal modules
pub(crate) mod tasks;

// Infrastructure modules (pub for flexibility)
pub mod data;
pub mod network;
pub mod testing;

// Re-export main API types for convenience
pub use protocol::{
    ClientNode,
    DownloadChangedEvent,
    FileCompleteEvent,
    FileFoundEvent,
    ProtocolConfig,
    ProtocolError,
    ProtocolEvent,
    ServerNode,
};
