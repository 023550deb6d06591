//! Local data for a Shoal peer
//!
//! Provides:
//! - File metadata records and content hashing
//! - The Content Directory (local search over shared files)
//! - Query matching for file names
//! - SQLite persistence for in-progress downloads

pub mod directory;
pub mod downloads;
pub mod file_record;
pub mod hash;
pub mod query;
pub mod schema;
pub mod start;

pub use directory::ContentDirectory;
pub use downloads::{clear_downloads, load_downloads, save_downloads, DownloadRecord, RangeRecord};
pub use file_record::{short_hash, FileRecord};
pub use hash::{Blake3Hasher, ContentHasher};
pub use query::Query;
pub use schema::{create_all_tables, SCHEMA_VERSION};
pub use start::{start_db, start_memory_db, StartError};
