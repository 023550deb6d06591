//! Local transfer handle
//!
//! Serves byte ranges of one local file. Invalidation is one-way: after
//! `invalidate()` every read fails.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;

use crate::data::FileRecord;
use crate::network::rpc::{generate_handle_id, HandleId, RemoteError, RemoteResult, TransferHandle};

/// A transfer handle backed by a file on this peer's disk
#[derive(Debug)]
pub struct LocalHandle {
    id: HandleId,
    record: FileRecord,
    invalidated: AtomicBool,
}

impl LocalHandle {
    pub fn new(record: FileRecord) -> Self {
        Self {
            id: generate_handle_id(),
            record,
            invalidated: AtomicBool::new(false),
        }
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Stop serving reads through this handle
    pub fn invalidate(&self) {
        if !self.invalidated.swap(true, Ordering::SeqCst) {
            trace!(hash = self.record.short_hash(), handle = self.id, "handle invalidated");
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferHandle for LocalHandle {
    fn handle_id(&self) -> HandleId {
        self.id
    }

    fn file_name(&self) -> String {
        self.record.name.clone()
    }

    fn size(&self) -> u64 {
        self.record.size
    }

    fn hash(&self) -> String {
        self.record.hash.clone()
    }

    async fn read_range(&self, offset: u64, len: usize) -> RemoteResult<Vec<u8>> {
        if self.is_invalidated() {
            return Err(RemoteError::Invalidated);
        }

        let io_err = |e: std::io::Error| RemoteError::Unreachable(e.to_string());
        let mut file = tokio::fs::File::open(&self.record.path).await.map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;

        // Never allocate past the end of the file
        let remaining = self.record.size.saturating_sub(offset);
        let len = len.min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let mut buf = vec![0u8; len];
        let mut filled = 0usize;
        while filled < len {
            let n = file.read(&mut buf[filled..]).await.map_err(io_err)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        // Invalidation may have raced with the read
        if self.is_invalidated() {
            return Err(RemoteError::Invalidated);
        }
        Ok(buf)
    }
}
