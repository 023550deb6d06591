//! Shoal Protocol - Public Interface
//!
//! This module provides the public API of a Shoal peer.
//! External code imports types and methods from here.
//!
//! # Module Structure
//!
//! - `client.rs`: ClientNode (shares, searches, downloads)
//! - `server.rs`: ServerNode (routes searches, joins the federation)
//! - `config.rs`: ProtocolConfig builder
//! - `error.rs`: ProtocolError
//! - `events.rs`: Protocol events (search replies, download progress)
//!
//! # Example
//!
//! ```ignore
//! use shoal_core::{ClientNode, ProtocolConfig, ServerNode};
//! use shoal_core::testing::TerminalDirectory;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ServerNode::new(&ProtocolConfig::default(), TerminalDirectory::new());
//!     let client = ClientNode::start(ProtocolConfig::default()).await?;
//!     client.connect(server).await?;
//!
//!     let id = client.search("holiday photos").await?;
//!     for hash in client.results(id).await?.keys() {
//!         client.download(id, hash).await?;
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod events;
mod server;

// Nodes
pub use client::ClientNode;
pub use server::ServerNode;

// Configuration
pub use config::{ProtocolConfig, DEFAULT_DB_FILE};

// Error type
pub use error::ProtocolError;

// Events (for app layer)
pub use events::{DownloadChangedEvent, FileCompleteEvent, FileFoundEvent, ProtocolEvent};
