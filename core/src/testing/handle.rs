//! In-memory transfer handle with failure injection

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::data::{Blake3Hasher, ContentHasher};
use crate::network::rpc::{generate_handle_id, HandleId, RemoteError, RemoteResult, TransferHandle};

/// Serves a byte buffer as if it were a remote file
pub struct MemoryHandle {
    id: HandleId,
    name: String,
    hash: String,
    data: Vec<u8>,
    reachable: AtomicBool,
    /// Successful reads allowed before every read fails
    fail_after: AtomicUsize,
    reads: AtomicUsize,
    /// Lowest offset served; `u64::MAX` until the first read
    served_from: AtomicU64,
    delay_ms: AtomicU64,
}

impl MemoryHandle {
    /// Handle over `data`, hashed with BLAKE3
    pub fn new(name: &str, data: Vec<u8>) -> Arc<Self> {
        let hash = Blake3Hasher.hash_bytes(&data);
        Self::new_with_hash(name, data, &hash)
    }

    /// Another source for the same content
    pub fn new_with_hash(name: &str, data: Vec<u8>, hash: &str) -> Arc<Self> {
        Arc::new(Self {
            id: generate_handle_id(),
            name: name.to_string(),
            hash: hash.to_string(),
            data,
            reachable: AtomicBool::new(true),
            fail_after: AtomicUsize::new(usize::MAX),
            reads: AtomicUsize::new(0),
            served_from: AtomicU64::new(u64::MAX),
            delay_ms: AtomicU64::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Serve `reads` reads, then fail as if the peer vanished
    pub fn fail_after_reads(&self, reads: usize) {
        self.fail_after.store(reads, Ordering::SeqCst);
    }

    /// Sleep before answering each read
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successful reads so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Lowest offset this handle has served, if any
    pub fn served_from(&self) -> Option<u64> {
        match self.served_from.load(Ordering::SeqCst) {
            u64::MAX => None,
            offset => Some(offset),
        }
    }
}

#[async_trait]
impl TransferHandle for MemoryHandle {
    fn handle_id(&self) -> HandleId {
        self.id
    }

    fn file_name(&self) -> String {
        self.name.clone()
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn hash(&self) -> String {
        self.hash.clone()
    }

    async fn read_range(&self, offset: u64, len: usize) -> RemoteResult<Vec<u8>> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("handle owner is down".to_string()));
        }
        if self.reads.load(Ordering::SeqCst) >= self.fail_after.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("handle owner went away".to_string()));
        }

        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.served_from.fetch_min(offset, Ordering::SeqCst);
        Ok(self.data[start..end].to_vec())
    }
}
