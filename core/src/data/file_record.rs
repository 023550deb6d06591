//! Indexed file metadata
//!
//! A `FileRecord` describes one shared file. Two records are the same file
//! when their content hashes match, regardless of name or location.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Metadata for a single shared file
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// File name as offered to peers (no directory part)
    pub name: String,
    /// Lower-case hex content digest
    pub hash: String,
    /// Size in bytes
    pub size: u64,
    /// Location on the local disk of the peer that indexed it
    pub path: PathBuf,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, hash: impl Into<String>, size: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            size,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First 16 hex characters of the hash, for log fields
    pub fn short_hash(&self) -> &str {
        short_hash(&self.hash)
    }
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for FileRecord {}

impl Hash for FileRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// Truncate a hex digest for logging
pub fn short_hash(hash: &str) -> &str {
    let end = hash
        .char_indices()
        .nth(16)
        .map(|(i, _)| i)
        .unwrap_or(hash.len());
    &hash[..end]
}
