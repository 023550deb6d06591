//! Reply Aggregator
//!
//! Collects, per open search, every file found so far and the providers
//! that reported it. A search id is either absent or maps to a (possibly
//! empty) hash -> reply table.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::data::{short_hash, FileRecord};
use crate::network::rpc::{PeerId, Provider, SearchId};

/// Errors from reply lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// No search with this id is open
    UnknownSearch(SearchId),
    /// The search is open but nothing with this hash was reported
    UnknownHash { id: SearchId, hash: String },
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyError::UnknownSearch(id) => write!(f, "unknown search id {}", id),
            ReplyError::UnknownHash { id, hash } => {
                write!(f, "hash {} not found in search {}", short_hash(hash), id)
            }
        }
    }
}

impl std::error::Error for ReplyError {}

/// One found file and everyone who offered it
#[derive(Clone)]
pub struct Reply {
    pub record: FileRecord,
    /// Providers in reply order; duplicates are kept
    pub providers: Vec<Arc<dyn Provider>>,
}

impl Reply {
    pub fn provider_ids(&self) -> Vec<PeerId> {
        self.providers.iter().map(|p| p.peer_id()).collect()
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("record", &self.record)
            .field("providers", &self.provider_ids())
            .finish()
    }
}

/// Snapshot of one search's results, keyed by content hash
pub type SearchResult = HashMap<String, Reply>;

/// Search results keyed by search id
#[derive(Debug, Default)]
pub struct ReplyAggregator {
    results: RwLock<HashMap<SearchId, SearchResult>>,
}

impl ReplyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `id` with no results yet
    pub async fn add_search(&self, id: SearchId) {
        self.results.write().await.entry(id).or_default();
    }

    /// Record that `provider` holds `record` for search `id`
    ///
    /// An unknown id is opened on the spot, so late replies are kept.
    pub async fn add_reply(&self, id: SearchId, provider: Arc<dyn Provider>, record: FileRecord) {
        let mut results = self.results.write().await;
        let result = results.entry(id).or_insert_with(|| {
            debug!(search_id = id, "reply for unknown search, opening it");
            HashMap::new()
        });

        trace!(
            search_id = id,
            hash = record.short_hash(),
            provider = %provider.peer_id(),
            "recording reply"
        );
        match result.get_mut(&record.hash) {
            Some(reply) => reply.providers.push(provider),
            None => {
                result.insert(
                    record.hash.clone(),
                    Reply {
                        record,
                        providers: vec![provider],
                    },
                );
            }
        }
    }

    pub async fn contains(&self, id: SearchId) -> bool {
        self.results.read().await.contains_key(&id)
    }

    /// Whether `hash` was reported for `id`
    pub async fn contains_hash(&self, id: SearchId, hash: &str) -> Result<bool, ReplyError> {
        let results = self.results.read().await;
        let result = results.get(&id).ok_or(ReplyError::UnknownSearch(id))?;
        Ok(result.contains_key(hash))
    }

    /// Snapshot of everything found for `id`
    pub async fn result(&self, id: SearchId) -> Result<SearchResult, ReplyError> {
        self.results
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ReplyError::UnknownSearch(id))
    }

    /// Providers that reported `hash` under `id`
    pub async fn providers(
        &self,
        id: SearchId,
        hash: &str,
    ) -> Result<Vec<Arc<dyn Provider>>, ReplyError> {
        Ok(self.reply(id, hash).await?.providers)
    }

    /// File metadata reported for `hash` under `id`
    pub async fn file_info(&self, id: SearchId, hash: &str) -> Result<FileRecord, ReplyError> {
        Ok(self.reply(id, hash).await?.record)
    }

    async fn reply(&self, id: SearchId, hash: &str) -> Result<Reply, ReplyError> {
        let results = self.results.read().await;
        let result = results.get(&id).ok_or(ReplyError::UnknownSearch(id))?;
        result.get(hash).cloned().ok_or_else(|| ReplyError::UnknownHash {
            id,
            hash: hash.to_string(),
        })
    }

    /// Forget search `id`
    pub async fn remove_result(&self, id: SearchId) -> Result<(), ReplyError> {
        self.results
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(ReplyError::UnknownSearch(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProvider;

    fn record(hash: &str) -> FileRecord {
        FileRecord::new("song.mp3", hash, 42, "/shared/song.mp3")
    }

    #[tokio::test]
    async fn test_unknown_search_not_found() {
        let replies = ReplyAggregator::new();
        assert_eq!(replies.result(9).await.unwrap_err(), ReplyError::UnknownSearch(9));
        assert!(matches!(
            replies.providers(9, "aa").await,
            Err(ReplyError::UnknownSearch(9))
        ));
        assert_eq!(replies.remove_result(9).await, Err(ReplyError::UnknownSearch(9)));
        assert_eq!(replies.contains_hash(9, "aa").await, Err(ReplyError::UnknownSearch(9)));
    }

    #[tokio::test]
    async fn test_open_search_is_empty_not_missing() {
        let replies = ReplyAggregator::new();
        replies.add_search(1).await;

        assert!(replies.result(1).await.unwrap().is_empty());
        assert_eq!(replies.contains_hash(1, "aa").await, Ok(false));
        assert_eq!(
            replies.file_info(1, "aa").await.unwrap_err(),
            ReplyError::UnknownHash { id: 1, hash: "aa".to_string() }
        );
    }

    #[tokio::test]
    async fn test_two_providers_same_hash() {
        let replies = ReplyAggregator::new();
        replies.add_search(1).await;
        let alice = FakeProvider::new();
        let bob = FakeProvider::new();

        replies.add_reply(1, alice.clone(), record("aa")).await;
        replies.add_reply(1, bob.clone(), record("aa")).await;

        let result = replies.result(1).await.unwrap();
        assert_eq!(result.len(), 1);
        let ids = result["aa"].provider_ids();
        assert_eq!(ids, vec![alice.peer_id(), bob.peer_id()]);
        assert_eq!(replies.providers(1, "aa").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_provider_accumulates() {
        let replies = ReplyAggregator::new();
        let alice = FakeProvider::new();
        replies.add_reply(1, alice.clone(), record("aa")).await;
        replies.add_reply(1, alice.clone(), record("aa")).await;
        assert_eq!(replies.providers(1, "aa").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_late_reply_opens_search() {
        let replies = ReplyAggregator::new();
        replies.add_reply(5, FakeProvider::new(), record("bb")).await;

        assert!(replies.contains(5).await);
        assert_eq!(replies.file_info(5, "bb").await.unwrap().size, 42);
        replies.remove_result(5).await.unwrap();
        assert!(!replies.contains(5).await);
    }
}
