//! Federation Node
//!
//! One member of the server-to-server mesh. Links are kept per node;
//! `connect` merges two components into a full mesh, and `flood_search`
//! forwards a search one hop to every linked node.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::network::rpc::{
    Consumer, PeerId, Provider, RemoteError, RemoteResult, SearchId, Terminal,
};

/// Errors surfaced by federation operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederationError {
    /// A node was asked to link to itself
    SelfLink,
    /// The address did not resolve to a node
    UnknownAddress(String),
    /// The remote node could not be reached
    Unreachable(String),
    /// The node has shut down
    Closed,
}

impl std::fmt::Display for FederationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FederationError::SelfLink => write!(f, "a node cannot link to itself"),
            FederationError::UnknownAddress(a) => write!(f, "no federation node at {}", a),
            FederationError::Unreachable(e) => write!(f, "federation node unreachable: {}", e),
            FederationError::Closed => write!(f, "federation node is closed"),
        }
    }
}

impl std::error::Error for FederationError {}

impl From<RemoteError> for FederationError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::SelfLink => FederationError::SelfLink,
            other => FederationError::Unreachable(other.to_string()),
        }
    }
}

/// Resolves a federation address to a remote node
#[async_trait]
pub trait TerminalResolver: Send + Sync + 'static {
    async fn resolve(&self, address: &str) -> Result<Arc<dyn Terminal>, FederationError>;
}

/// A server's membership in the federation mesh
pub struct FederationNode {
    id: PeerId,
    me: Weak<FederationNode>,
    /// Local search entry point for relayed searches
    local: Weak<dyn Provider>,
    resolver: Arc<dyn TerminalResolver>,
    links: RwLock<HashMap<PeerId, Arc<dyn Terminal>>>,
}

impl std::fmt::Debug for FederationNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationNode").field("id", &self.id).finish_non_exhaustive()
    }
}

impl FederationNode {
    /// Create a node that relays forwarded searches to `local`
    pub fn new(
        id: PeerId,
        local: Weak<dyn Provider>,
        resolver: Arc<dyn TerminalResolver>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            local,
            resolver,
            links: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    fn this(&self) -> Result<Arc<dyn Terminal>, FederationError> {
        let me: Arc<dyn Terminal> = self.me.upgrade().ok_or(FederationError::Closed)?;
        Ok(me)
    }

    pub async fn is_linked(&self, id: &PeerId) -> bool {
        self.links.read().await.contains_key(id)
    }

    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }

    /// Create a bidirectional edge between this node and `other`
    pub async fn link(&self, other: Arc<dyn Terminal>) -> Result<(), FederationError> {
        let this = self.this()?;
        self.link_to(other.clone()).await?;
        other.link_to(this).await?;
        Ok(())
    }

    /// Forget the link to `id`
    pub async fn unlink(&self, id: &PeerId) -> bool {
        self.links.write().await.remove(id).is_some()
    }

    /// Join the component reachable at `address`
    ///
    /// Every node known locally (including this one) is linked both ways to
    /// every node known by the remote (including the remote). Individual
    /// link failures are skipped.
    pub async fn connect(&self, address: &str) -> Result<(), FederationError> {
        let remote = self.resolver.resolve(address).await?;
        if remote.terminal_id() == self.id {
            return Err(FederationError::SelfLink);
        }

        let mut local_side: Vec<Arc<dyn Terminal>> = vec![self.this()?];
        local_side.extend(self.links.read().await.values().cloned());

        let mut remote_side: Vec<Arc<dyn Terminal>> = vec![remote.clone()];
        remote_side.extend(remote.known_terminals().await?);

        let mut linked = 0usize;
        for ours in &local_side {
            for theirs in &remote_side {
                if ours.terminal_id() == theirs.terminal_id() {
                    continue;
                }
                if let Err(e) = ours.link_to(theirs.clone()).await {
                    debug!(from = %ours.terminal_id(), to = %theirs.terminal_id(), error = %e, "link skipped");
                    continue;
                }
                if let Err(e) = theirs.link_to(ours.clone()).await {
                    debug!(from = %theirs.terminal_id(), to = %ours.terminal_id(), error = %e, "link skipped");
                    continue;
                }
                linked += 1;
            }
        }

        info!(
            address = address,
            local = local_side.len(),
            remote = remote_side.len(),
            pairs = linked,
            "joined federation"
        );
        Ok(())
    }

    /// Forward a search to every linked node, unlinking any that fail
    ///
    /// Returns the number of nodes reached.
    pub async fn flood_search(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> usize {
        let Ok(this) = self.this() else {
            return 0;
        };
        let links: Vec<Arc<dyn Terminal>> = self.links.read().await.values().cloned().collect();

        let outcomes = join_all(links.iter().map(|link| {
            let this = this.clone();
            let consumer = consumer.clone();
            async move {
                let result = link
                    .search_from_community(this, id, consumer, query)
                    .await;
                (link.terminal_id(), result)
            }
        }))
        .await;

        let mut reached = 0usize;
        for (peer, result) in outcomes {
            match result {
                Ok(()) => reached += 1,
                Err(e) => {
                    warn!(node = %peer, search_id = id, error = %e, "federation node unreachable, unlinking");
                    self.unlink(&peer).await;
                }
            }
        }

        info!(search_id = id, reached = reached, "flooded search to federation");
        reached
    }
}

#[async_trait]
impl Terminal for FederationNode {
    fn terminal_id(&self) -> PeerId {
        self.id
    }

    async fn link_to(&self, other: Arc<dyn Terminal>) -> RemoteResult<()> {
        let other_id = other.terminal_id();
        if other_id == self.id {
            return Err(RemoteError::SelfLink);
        }
        let mut links = self.links.write().await;
        if links.insert(other_id, other).is_none() {
            debug!(node = %self.id, linked = %other_id, "linked federation node");
        }
        Ok(())
    }

    async fn known_terminals(&self) -> RemoteResult<Vec<Arc<dyn Terminal>>> {
        Ok(self.links.read().await.values().cloned().collect())
    }

    async fn search_from_community(
        &self,
        from: Arc<dyn Terminal>,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()> {
        let from_id = from.terminal_id();
        if !self.is_linked(&from_id).await {
            warn!(from = %from_id, search_id = id, "ignoring search from unlinked node");
            return Ok(());
        }

        let Some(local) = self.local.upgrade() else {
            return Err(RemoteError::Unreachable("server stopped".to_string()));
        };
        local.search_for_community(id, consumer, query).await
    }
}
