//! Server federation mesh

mod node;

pub use node::{FederationError, FederationNode, TerminalResolver};
