//! In-process federation address book

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::network::federation::{FederationError, FederationNode, TerminalResolver};
use crate::network::rpc::Terminal;

/// Resolves addresses to federation nodes living in the same process
#[derive(Default)]
pub struct TerminalDirectory {
    nodes: RwLock<HashMap<String, Arc<FederationNode>>>,
}

impl TerminalDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `node` reachable at `address`
    pub fn register(&self, address: &str, node: Arc<FederationNode>) {
        self.nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address.to_string(), node);
    }

    /// Make `address` unresolvable
    pub fn remove(&self, address: &str) -> bool {
        self.nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(address)
            .is_some()
    }
}

#[async_trait]
impl TerminalResolver for TerminalDirectory {
    async fn resolve(&self, address: &str) -> Result<Arc<dyn Terminal>, FederationError> {
        let node = self
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(address)
            .cloned();
        match node {
            Some(node) => {
                let terminal: Arc<dyn Terminal> = node;
                Ok(terminal)
            }
            None => Err(FederationError::UnknownAddress(address.to_string())),
        }
    }
}
