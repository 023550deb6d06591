//! Remote capability traits
//!
//! These traits are the boundary between the overlay core and whatever
//! transport carries calls between peers. Every method may fail with a
//! [`RemoteError`]; callers treat transport failures as "peer unreachable".
//!
//! | Role | Trait | Exposed by |
//! |------|-------|------------|
//! | Provider | [`Provider`] | clients (content holders) and servers (search routers) |
//! | Consumer | [`Consumer`] | clients |
//! | Transfer handle | [`TransferHandle`] | the provider serving a file |
//! | Federation terminal | [`Terminal`] | servers |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use crate::data::FileRecord;

/// Identifier of an outstanding search
pub type SearchId = u64;

/// Identifier of a transfer handle, unique per handle instance
pub type HandleId = u64;

/// Transport identity of a peer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Generate a fresh random identity
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// Generate a fresh search id: a large random non-negative integer
pub fn generate_search_id() -> SearchId {
    rand::thread_rng().gen_range(1..=i64::MAX as u64)
}

/// Generate a fresh transfer handle id
pub fn generate_handle_id() -> HandleId {
    rand::thread_rng().gen()
}

/// Failure of a remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote endpoint could not be reached
    Unreachable(String),
    /// The remote role does not support this operation
    Unsupported(&'static str),
    /// The transfer handle was invalidated by its provider
    Invalidated,
    /// A federation node was asked to link to itself
    SelfLink,
    /// The remote refused a malformed or conflicting request
    Rejected(String),
}

impl RemoteError {
    /// Whether this error means the peer should be dropped from membership
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_) | RemoteError::Invalidated)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Unreachable(e) => write!(f, "peer unreachable: {}", e),
            RemoteError::Unsupported(op) => write!(f, "operation not supported: {}", op),
            RemoteError::Invalidated => write!(f, "transfer handle invalidated"),
            RemoteError::SelfLink => write!(f, "a node cannot link to itself"),
            RemoteError::Rejected(e) => write!(f, "request rejected: {}", e),
        }
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Something that can be searched and asked for files
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Transport identity of this provider
    fn peer_id(&self) -> PeerId;

    /// Attach `provider` to this one (servers only)
    async fn identify(&self, provider: Arc<dyn Provider>) -> RemoteResult<()>;

    /// Search by name under a caller-assigned id; results go to `consumer`
    async fn search_by_query(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()>;

    /// Search by name, letting the provider assign the id (servers only)
    async fn search(&self, consumer: Arc<dyn Consumer>, query: &str) -> RemoteResult<SearchId>;

    /// Look for more sources of a known file
    async fn search_by_hash(&self, hash: &str, consumer: Arc<dyn Consumer>) -> RemoteResult<()>;

    /// Search relayed from the federation (servers only)
    async fn search_for_community(
        &self,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()>;

    /// Ask for a transfer handle for `hash` to be delivered to `consumer`
    async fn get_file(&self, hash: &str, consumer: Arc<dyn Consumer>) -> RemoteResult<()>;
}

/// Something that receives search results and transfer handles
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Transport identity of this consumer
    fn peer_id(&self) -> PeerId;

    async fn file_was_found(
        &self,
        id: SearchId,
        provider: Arc<dyn Provider>,
        record: FileRecord,
    ) -> RemoteResult<()>;

    async fn here_is_file(&self, handle: Arc<dyn TransferHandle>) -> RemoteResult<()>;

    /// Liveness probe; any successful return counts as alive
    async fn ping(&self) -> RemoteResult<()>;
}

/// Random-access reads of one file served by a provider
#[async_trait]
pub trait TransferHandle: Send + Sync + 'static {
    /// Identity of this handle; two handles with the same id are the same source
    fn handle_id(&self) -> HandleId;

    fn file_name(&self) -> String;

    fn size(&self) -> u64;

    fn hash(&self) -> String;

    /// Read up to `len` bytes starting at `offset`
    ///
    /// Returns fewer bytes only at end of file. Fails once invalidated.
    async fn read_range(&self, offset: u64, len: usize) -> RemoteResult<Vec<u8>>;
}

/// A server-to-server federation member
#[async_trait]
pub trait Terminal: Send + Sync + 'static {
    fn terminal_id(&self) -> PeerId;

    /// Record a one-way link to `other`; fails with `SelfLink` for self
    async fn link_to(&self, other: Arc<dyn Terminal>) -> RemoteResult<()>;

    /// Nodes this terminal is linked to
    async fn known_terminals(&self) -> RemoteResult<Vec<Arc<dyn Terminal>>>;

    /// Search forwarded by a linked node
    async fn search_from_community(
        &self,
        from: Arc<dyn Terminal>,
        id: SearchId,
        consumer: Arc<dyn Consumer>,
        query: &str,
    ) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display_is_short_hex() {
        let id = PeerId([0xab; 32]);
        assert_eq!(id.to_string(), "abababababababab");
        assert_eq!(id.to_hex().len(), 64);
        assert_ne!(PeerId::random(), PeerId::random());
    }

    #[test]
    fn test_search_id_is_positive() {
        for _ in 0..1000 {
            let id = generate_search_id();
            assert!(id >= 1);
            assert!(id <= i64::MAX as u64);
        }
    }

    #[test]
    fn test_remote_error_classification() {
        assert!(RemoteError::Unreachable("timeout".into()).is_unreachable());
        assert!(RemoteError::Invalidated.is_unreachable());
        assert!(!RemoteError::Unsupported("identify").is_unreachable());
        assert!(!RemoteError::SelfLink.is_unreachable());
        assert!(!RemoteError::Rejected("duplicate search id".into()).is_unreachable());
        assert_eq!(
            RemoteError::Unsupported("get_file").to_string(),
            "operation not supported: get_file"
        );
    }
}
