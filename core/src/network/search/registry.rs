//! Request Registry
//!
//! Outstanding searches with a bounded retry budget. Each time a new
//! provider attaches, every request is replayed against it once; a replay
//! the provider accepts spends one retry. A request whose budget is spent
//! is dropped instead.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::network::rpc::{Consumer, SearchId};

/// Errors from the request registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The id generator produced an id that is still registered
    AlreadyRegistered(SearchId),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::AlreadyRegistered(id) => {
                write!(f, "search id {} is already registered", id)
            }
        }
    }
}

impl std::error::Error for RequestError {}

/// An outstanding search
#[derive(Clone)]
pub struct SearchRequest {
    pub id: SearchId,
    pub consumer: Arc<dyn Consumer>,
    pub query: String,
    /// Remaining replays; never negative
    pub retries: u32,
}

impl std::fmt::Debug for SearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchRequest")
            .field("id", &self.id)
            .field("consumer", &self.consumer.peer_id())
            .field("query", &self.query)
            .field("retries", &self.retries)
            .finish()
    }
}

/// Stores outstanding searches keyed by id
#[derive(Debug)]
pub struct RequestRegistry {
    default_retries: u32,
    requests: Mutex<HashMap<SearchId, SearchRequest>>,
}

impl RequestRegistry {
    /// New registry whose requests start with `default_retries` replays
    pub fn new(default_retries: u32) -> Self {
        Self {
            default_retries,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_retries(&self) -> u32 {
        self.default_retries
    }

    /// Register a new search with the default retry budget
    pub async fn register(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> Result<(), RequestError> {
        self.register_with_retries(id, consumer, query, self.default_retries)
            .await
    }

    /// Register a new search with an explicit retry budget
    pub async fn register_with_retries(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
        retries: u32,
    ) -> Result<(), RequestError> {
        let mut requests = self.requests.lock().await;
        if requests.contains_key(&id) {
            return Err(RequestError::AlreadyRegistered(id));
        }
        requests.insert(
            id,
            SearchRequest {
                id,
                consumer,
                query: query.to_string(),
                retries,
            },
        );
        trace!(search_id = id, retries = retries, "registered search request");
        Ok(())
    }

    pub async fn get(&self, id: SearchId) -> Option<SearchRequest> {
        self.requests.lock().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: SearchId) -> bool {
        self.requests.lock().await.contains_key(&id)
    }

    pub async fn remove(&self, id: SearchId) -> Option<SearchRequest> {
        self.requests.lock().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.lock().await.is_empty()
    }

    /// Requests to replay against a newly attached provider
    ///
    /// Requests with an exhausted budget are removed and not returned. The
    /// budget of a returned request is only spent by `mark_replayed`.
    pub async fn replay_batch(&self) -> Vec<SearchRequest> {
        let mut requests = self.requests.lock().await;

        let before = requests.len();
        requests.retain(|_, r| r.retries > 0);
        let dropped = before - requests.len();
        if dropped > 0 {
            debug!(dropped = dropped, "dropped search requests with no retries left");
        }

        requests.values().cloned().collect()
    }

    /// Spend one replay of `id`; returns the budget left, if still registered
    pub async fn mark_replayed(&self, id: SearchId) -> Option<u32> {
        let mut requests = self.requests.lock().await;
        let request = requests.get_mut(&id)?;
        request.retries = request.retries.saturating_sub(1);
        Some(request.retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConsumer;

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = RequestRegistry::new(0);
        let consumer = FakeConsumer::new();
        registry.register(7, consumer.clone(), "song").await.unwrap();

        let result = registry.register(7, consumer, "other").await;
        assert_eq!(result, Err(RequestError::AlreadyRegistered(7)));
        assert_eq!(registry.get(7).await.unwrap().query, "song");
    }

    #[tokio::test]
    async fn test_replayed_exactly_budget_times() {
        let registry = RequestRegistry::new(3);
        registry.register(1, FakeConsumer::new(), "song").await.unwrap();

        for expected_left in [2u32, 1, 0] {
            let batch = registry.replay_batch().await;
            assert_eq!(batch.len(), 1);
            assert_eq!(registry.mark_replayed(batch[0].id).await, Some(expected_left));
        }

        assert!(registry.replay_batch().await.is_empty());
        assert!(!registry.contains(1).await);
    }

    #[tokio::test]
    async fn test_unsent_replay_keeps_budget() {
        let registry = RequestRegistry::new(1);
        registry.register(1, FakeConsumer::new(), "song").await.unwrap();

        assert_eq!(registry.replay_batch().await.len(), 1);
        assert_eq!(registry.replay_batch().await.len(), 1);
        assert_eq!(registry.get(1).await.unwrap().retries, 1);
        assert_eq!(registry.mark_replayed(99).await, None);
    }

    #[tokio::test]
    async fn test_zero_budget_never_replayed() {
        let registry = RequestRegistry::new(0);
        registry.register(1, FakeConsumer::new(), "song").await.unwrap();
        registry
            .register_with_retries(2, FakeConsumer::new(), "film", 1)
            .await
            .unwrap();

        let batch = registry.replay_batch().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, 2);
        assert_eq!(registry.len().await, 1);
    }
}
