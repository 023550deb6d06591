//! Server node
//!
//! A search router. Clients identify themselves to it as providers; it
//! fans their searches out to each other and, for searches coming from an
//! attached client, floods them through the federation. It never holds
//! content, so `get_file` is refused.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, info};

use super::config::ProtocolConfig;
use super::error::ProtocolError;
use crate::data::short_hash;
use crate::network::federation::{FederationNode, TerminalResolver};
use crate::network::rpc::{
    Consumer, PeerId, Provider, RemoteError, RemoteResult, SearchId,
};
use crate::network::search::{RequestError, RequestRegistry, SearchCoordinator};

/// A server peer: routes searches, joins the federation
pub struct ServerNode {
    id: PeerId,
    coordinator: SearchCoordinator,
    federation: Arc<FederationNode>,
}

impl std::fmt::Debug for ServerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerNode")
            .field("id", &self.id)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl ServerNode {
    /// Create a server; federation addresses are resolved through `resolver`
    pub fn new(config: &ProtocolConfig, resolver: Arc<dyn TerminalResolver>) -> Arc<Self> {
        let id = PeerId::random();
        let registry = Arc::new(RequestRegistry::new(config.max_retries));

        let node = Arc::new_cyclic(|me: &Weak<ServerNode>| {
            let local: Weak<dyn Provider> = me.clone();
            let federation = FederationNode::new(id, local, resolver);
            Self {
                id,
                coordinator: SearchCoordinator::new(registry, Some(federation.clone())),
                federation,
            }
        });

        info!(peer = %id, max_retries = config.max_retries, "server node started");
        node
    }

    pub fn peer_id(&self) -> PeerId {
        self.id
    }

    pub fn coordinator(&self) -> &SearchCoordinator {
        &self.coordinator
    }

    /// This server's membership in the federation
    pub fn federation(&self) -> &Arc<FederationNode> {
        &self.federation
    }

    /// Join the federation component reachable at `address`
    pub async fn connect_federation(&self, address: &str) -> Result<(), ProtocolError> {
        self.federation.connect(address).await?;
        let links = self.federation.link_count().await;
        info!(
            peer = %self.id,
            address = address,
            links = links,
            "joined federation"
        );
        Ok(())
    }

    /// Peers currently attached as providers
    pub async fn providers(&self) -> Vec<PeerId> {
        self.coordinator.attached().await
    }
}

fn rejected(e: RequestError) -> RemoteError {
    RemoteError::Rejected(e.to_string())
}

#[async_trait]
impl Provider for ServerNode {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    async fn identify(&self, provider: Arc<dyn Provider>) -> RemoteResult<()> {
        self.coordinator.on_provider_identified(provider).await;
        Ok(())
    }

    async fn search_by_query(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()> {
        self.coordinator
            .search_by_query(id, consumer, query)
            .await
            .map(|_| ())
            .map_err(rejected)
    }

    async fn search(&self, consumer: Arc<dyn Consumer>, query: &str) -> RemoteResult<SearchId> {
        self.coordinator.search(consumer, query).await.map_err(rejected)
    }

    async fn search_by_hash(&self, hash: &str, consumer: Arc<dyn Consumer>) -> RemoteResult<()> {
        let reached = self.coordinator.search_by_hash(hash, consumer).await;
        debug!(hash = short_hash(hash), reached = reached, "source search routed");
        Ok(())
    }

    async fn search_for_community(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()> {
        self.coordinator.search_for_community(id, consumer, query).await;
        Ok(())
    }

    async fn get_file(&self, _hash: &str, _consumer: Arc<dyn Consumer>) -> RemoteResult<()> {
        Err(RemoteError::Unsupported("get_file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConsumer, FakeProvider, TerminalDirectory};

    fn server_with(directory: &Arc<TerminalDirectory>, retries: u32) -> Arc<ServerNode> {
        ServerNode::new(
            &ProtocolConfig::default().with_max_retries(retries),
            directory.clone(),
        )
    }

    #[tokio::test]
    async fn test_identify_attaches_provider() {
        let server = server_with(&TerminalDirectory::new(), 0);
        let provider = FakeProvider::new();

        server.identify(provider.clone()).await.unwrap();
        assert_eq!(server.providers().await, vec![provider.peer_id()]);
    }

    #[tokio::test]
    async fn test_search_assigns_id_and_fans_out() {
        let server = server_with(&TerminalDirectory::new(), 0);
        let a = FakeProvider::new();
        let b = FakeProvider::new();
        server.identify(a.clone()).await.unwrap();
        server.identify(b.clone()).await.unwrap();

        let consumer = FakeConsumer::new();
        let id = server.search(consumer, "holiday").await.unwrap();
        assert!(id >= 1);
        assert_eq!(a.query_searches().await, vec![(id, "holiday".to_string())]);
        assert_eq!(b.query_searches().await, vec![(id, "holiday".to_string())]);
    }

    #[tokio::test]
    async fn test_duplicate_search_id_rejected() {
        let server = server_with(&TerminalDirectory::new(), 0);
        let consumer = FakeConsumer::new();

        server.search_by_query(5, consumer.clone(), "a").await.unwrap();
        let err = server.search_by_query(5, consumer, "b").await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
        assert!(!err.is_unreachable());
    }

    #[tokio::test]
    async fn test_hash_search_skips_requester() {
        let server = server_with(&TerminalDirectory::new(), 0);
        let holder = FakeProvider::new();
        let requester = FakeProvider::new();
        server.identify(holder.clone()).await.unwrap();
        server.identify(requester.clone()).await.unwrap();

        server
            .search_by_hash("abcd", requester.as_consumer())
            .await
            .unwrap();
        assert_eq!(holder.hash_searches().await, vec!["abcd".to_string()]);
        assert!(requester.hash_searches().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_file_unsupported() {
        let server = server_with(&TerminalDirectory::new(), 0);
        assert_eq!(
            server.get_file("abcd", FakeConsumer::new()).await,
            Err(RemoteError::Unsupported("get_file"))
        );
    }

    #[tokio::test]
    async fn test_federated_search_reaches_remote_providers() {
        let directory = TerminalDirectory::new();
        let east = server_with(&directory, 0);
        let west = server_with(&directory, 0);
        directory.register("east", east.federation().clone());
        directory.register("west", west.federation().clone());

        west.connect_federation("east").await.unwrap();
        assert!(east.federation().is_linked(&west.peer_id()).await);

        let remote_holder = FakeProvider::new();
        east.identify(remote_holder.clone()).await.unwrap();

        // Searches from attached peers are flooded
        let searcher = FakeProvider::new();
        west.identify(searcher.clone()).await.unwrap();
        west.search_by_query(11, searcher.as_consumer(), "map").await.unwrap();
        assert_eq!(remote_holder.query_searches().await, vec![(11, "map".to_string())]);

        // Leaf consumers stay local
        west.search_by_query(12, FakeConsumer::new(), "atlas").await.unwrap();
        assert_eq!(remote_holder.query_searches().await.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_to_late_provider() {
        let server = server_with(&TerminalDirectory::new(), 1);
        let consumer = FakeConsumer::new();
        let id = server.search(consumer, "late").await.unwrap();

        let late = FakeProvider::new();
        server.identify(late.clone()).await.unwrap();
        assert_eq!(late.query_searches().await, vec![(id, "late".to_string())]);

        // Budget spent
        let later = FakeProvider::new();
        server.identify(later.clone()).await.unwrap();
        assert!(later.query_searches().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_federation_address() {
        let server = server_with(&TerminalDirectory::new(), 0);
        assert!(matches!(
            server.connect_federation("nowhere").await,
            Err(ProtocolError::Federation(_))
        ));
    }
}
