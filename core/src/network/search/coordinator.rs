//! Search Coordinator
//!
//! Server-side routing of searches:
//! - registers searches and fans them out to attached providers
//! - floods searches from peers through the federation
//! - replays outstanding searches whenever a provider attaches
//!
//! Providers that fail during fan-out are detached; the search still
//! succeeds for everyone who answered.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::registry::{RequestError, RequestRegistry};
use crate::data::short_hash;
use crate::network::federation::FederationNode;
use crate::network::rpc::{
    generate_search_id, Consumer, PeerId, Provider, RemoteResult, SearchId,
};

/// Routes searches between attached providers and the federation
pub struct SearchCoordinator {
    registry: Arc<RequestRegistry>,
    providers: RwLock<HashMap<PeerId, Arc<dyn Provider>>>,
    federation: Option<Arc<FederationNode>>,
}

impl std::fmt::Debug for SearchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCoordinator")
            .field("registry", &self.registry)
            .field("federated", &self.federation.is_some())
            .finish_non_exhaustive()
    }
}

impl SearchCoordinator {
    pub fn new(registry: Arc<RequestRegistry>, federation: Option<Arc<FederationNode>>) -> Self {
        Self {
            registry,
            providers: RwLock::new(HashMap::new()),
            federation,
        }
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    /// Ids of every attached provider
    pub async fn attached(&self) -> Vec<PeerId> {
        self.providers.read().await.keys().copied().collect()
    }

    pub async fn is_attached(&self, id: &PeerId) -> bool {
        self.providers.read().await.contains_key(id)
    }

    /// Detach a provider; returns whether it was attached
    pub async fn detach(&self, id: &PeerId) -> bool {
        let removed = self.providers.write().await.remove(id).is_some();
        if removed {
            info!(peer = %id, "provider detached");
        }
        removed
    }

    /// Attach `provider` and replay outstanding searches against it
    pub async fn on_provider_identified(&self, provider: Arc<dyn Provider>) {
        let peer = provider.peer_id();
        self.providers.write().await.insert(peer, provider.clone());
        info!(peer = %peer, "provider identified");

        let batch = self.registry.replay_batch().await;
        let mut replayed = 0usize;
        for request in batch {
            if request.consumer.peer_id() == peer {
                continue;
            }
            match provider
                .search_by_query(request.id, request.consumer.clone(), &request.query)
                .await
            {
                Ok(()) => {
                    self.registry.mark_replayed(request.id).await;
                    replayed += 1;
                }
                Err(e) if e.is_unreachable() => {
                    warn!(peer = %peer, error = %e, "new provider unreachable during replay");
                    self.detach(&peer).await;
                    break;
                }
                Err(e) => {
                    debug!(peer = %peer, search_id = request.id, error = %e, "replay rejected");
                }
            }
        }

        if replayed > 0 {
            info!(peer = %peer, replayed = replayed, "replayed outstanding searches");
        }
    }

    /// Register a search without fanning it out
    pub async fn register_search(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> Result<(), RequestError> {
        self.registry.register(id, consumer, query).await
    }

    /// Register a search under `id` and fan it out
    ///
    /// Searches from an attached peer are also flooded through the federation.
    pub async fn search_by_query(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> Result<usize, RequestError> {
        self.register_search(id, consumer.clone(), query).await?;

        let from_peer = self.is_attached(&consumer.peer_id()).await;
        if from_peer {
            if let Some(federation) = &self.federation {
                federation.flood_search(id, consumer.clone(), query).await;
            }
        }

        let reached = self.fan_out_query(id, consumer, query).await;
        info!(search_id = id, reached = reached, "search sent to local providers");
        Ok(reached)
    }

    /// Assign a fresh id, then register and fan out
    pub async fn search(
        &self,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> Result<SearchId, RequestError> {
        let id = generate_search_id();
        self.search_by_query(id, consumer, query).await?;
        Ok(id)
    }

    /// Ask attached providers for more sources of `hash`
    ///
    /// Not registered and never replayed.
    pub async fn search_by_hash(&self, hash: &str, consumer: Arc<dyn Consumer>) -> usize {
        let exclude = consumer.peer_id();
        let providers = self.providers_except(&exclude).await;

        let outcomes = join_all(providers.iter().map(|(peer, provider)| {
            let consumer = consumer.clone();
            async move { (*peer, provider.search_by_hash(hash, consumer).await) }
        }))
        .await;

        let reached = self.count_and_detach(outcomes).await;
        info!(hash = short_hash(hash), reached = reached, "hash search sent to local providers");
        reached
    }

    /// Fan out a search relayed from the federation
    ///
    /// Not registered and not flooded again.
    pub async fn search_for_community(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> usize {
        let reached = self.fan_out_query(id, consumer, query).await;
        info!(search_id = id, reached = reached, "community search sent to local providers");
        reached
    }

    async fn fan_out_query(&self, id: SearchId, consumer: Arc<dyn Consumer>, query: &str) -> usize {
        let exclude = consumer.peer_id();
        let providers = self.providers_except(&exclude).await;

        let outcomes = join_all(providers.iter().map(|(peer, provider)| {
            let consumer = consumer.clone();
            async move { (*peer, provider.search_by_query(id, consumer, query).await) }
        }))
        .await;

        self.count_and_detach(outcomes).await
    }

    async fn providers_except(&self, exclude: &PeerId) -> Vec<(PeerId, Arc<dyn Provider>)> {
        self.providers
            .read()
            .await
            .iter()
            .filter(|(peer, _)| *peer != exclude)
            .map(|(peer, provider)| (*peer, provider.clone()))
            .collect()
    }

    async fn count_and_detach(
        &self,
        outcomes: Vec<(PeerId, RemoteResult<()>)>,
    ) -> usize {
        let mut reached = 0usize;
        for (peer, result) in outcomes {
            match result {
                Ok(()) => reached += 1,
                Err(e) if e.is_unreachable() => {
                    warn!(peer = %peer, error = %e, "provider unreachable during fan-out");
                    self.detach(&peer).await;
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "provider declined search");
                }
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::federation::FederationNode;
    use crate::testing::{FakeConsumer, FakeProvider, TerminalDirectory};
    use std::sync::Weak;

    fn coordinator(retries: u32) -> SearchCoordinator {
        SearchCoordinator::new(Arc::new(RequestRegistry::new(retries)), None)
    }

    #[tokio::test]
    async fn test_fan_out_excludes_requester() {
        let coordinator = coordinator(0);
        let alice = FakeProvider::new();
        let bob = FakeProvider::new();
        coordinator.on_provider_identified(alice.clone()).await;
        coordinator.on_provider_identified(bob.clone()).await;

        let reached = coordinator
            .search_by_query(1, alice.as_consumer(), "song")
            .await
            .unwrap();
        assert_eq!(reached, 1);
        assert!(alice.query_searches().await.is_empty());
        assert_eq!(bob.query_searches().await, vec![(1, "song".to_string())]);
        assert!(coordinator.registry().contains(1).await);
    }

    #[tokio::test]
    async fn test_failed_provider_detached() {
        let coordinator = coordinator(0);
        let alive = FakeProvider::new();
        let dead = FakeProvider::new();
        dead.set_reachable(false);
        coordinator.on_provider_identified(alive.clone()).await;
        coordinator.on_provider_identified(dead.clone()).await;

        let reached = coordinator
            .search_by_query(2, FakeConsumer::new(), "song")
            .await
            .unwrap();
        assert_eq!(reached, 1);
        assert!(!coordinator.is_attached(&dead.peer_id()).await);
        assert!(coordinator.is_attached(&alive.peer_id()).await);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let coordinator = coordinator(0);
        let consumer = FakeConsumer::new();
        coordinator.search_by_query(3, consumer.clone(), "a").await.unwrap();
        assert_eq!(
            coordinator.search_by_query(3, consumer, "b").await,
            Err(RequestError::AlreadyRegistered(3))
        );
    }

    #[tokio::test]
    async fn test_generated_search_registered() {
        let coordinator = coordinator(0);
        let id = coordinator.search(FakeConsumer::new(), "song").await.unwrap();
        assert!(id > 0);
        assert!(coordinator.registry().contains(id).await);
    }

    #[tokio::test]
    async fn test_replay_on_identify_respects_budget() {
        let coordinator = coordinator(2);
        coordinator.search_by_query(9, FakeConsumer::new(), "film").await.unwrap();

        let late = [FakeProvider::new(), FakeProvider::new(), FakeProvider::new()];
        for provider in &late {
            coordinator.on_provider_identified(provider.clone()).await;
        }

        assert_eq!(late[0].query_searches().await, vec![(9, "film".to_string())]);
        assert_eq!(late[1].query_searches().await, vec![(9, "film".to_string())]);
        assert!(late[2].query_searches().await.is_empty());
        assert!(!coordinator.registry().contains(9).await);
    }

    #[tokio::test]
    async fn test_failed_replay_does_not_spend_budget() {
        let coordinator = coordinator(1);
        coordinator.search_by_query(1, FakeConsumer::new(), "song").await.unwrap();
        coordinator.search_by_query(2, FakeConsumer::new(), "film").await.unwrap();

        let dead = FakeProvider::new();
        dead.set_reachable(false);
        coordinator.on_provider_identified(dead.clone()).await;
        assert!(!coordinator.is_attached(&dead.peer_id()).await);

        let live = FakeProvider::new();
        coordinator.on_provider_identified(live.clone()).await;
        let mut replayed = live.query_searches().await;
        replayed.sort();
        assert_eq!(
            replayed,
            vec![(1, "song".to_string()), (2, "film".to_string())]
        );
        assert_eq!(coordinator.registry().get(1).await.unwrap().retries, 0);
    }

    #[tokio::test]
    async fn test_requester_skip_does_not_spend_budget() {
        let coordinator = coordinator(1);
        let requester = FakeProvider::new();
        coordinator.on_provider_identified(requester.clone()).await;
        coordinator.search_by_query(4, requester.as_consumer(), "map").await.unwrap();

        // Reconnecting requester is skipped
        coordinator.on_provider_identified(requester.clone()).await;
        assert_eq!(coordinator.registry().get(4).await.unwrap().retries, 1);

        let other = FakeProvider::new();
        coordinator.on_provider_identified(other.clone()).await;
        assert_eq!(other.query_searches().await, vec![(4, "map".to_string())]);
    }

    #[tokio::test]
    async fn test_search_by_hash_not_registered() {
        let coordinator = coordinator(5);
        let provider = FakeProvider::new();
        coordinator.on_provider_identified(provider.clone()).await;

        let reached = coordinator.search_by_hash("abcd", FakeConsumer::new()).await;
        assert_eq!(reached, 1);
        assert_eq!(provider.hash_searches().await, vec!["abcd".to_string()]);
        assert!(coordinator.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_peer_search_flooded_leaf_search_not() {
        let directory = TerminalDirectory::new();
        let remote_server = FakeProvider::new();
        let remote_local: Arc<dyn Provider> = remote_server.clone();
        let remote = FederationNode::new(
            PeerId::random(),
            Arc::downgrade(&remote_local),
            directory.clone(),
        );
        let local = FederationNode::new(PeerId::random(), Weak::<FakeProvider>::new(), directory.clone());
        local.link(remote.clone()).await.unwrap();

        let coordinator = SearchCoordinator::new(Arc::new(RequestRegistry::new(0)), Some(local));
        let peer = FakeProvider::new();
        coordinator.on_provider_identified(peer.clone()).await;

        coordinator.search_by_query(1, FakeConsumer::new(), "leaf").await.unwrap();
        coordinator.search_by_query(2, peer.as_consumer(), "peer").await.unwrap();

        assert_eq!(remote_server.community_searches().await, vec![(2, "peer".to_string())]);
    }
}
