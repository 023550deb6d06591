//! Distributed search
//!
//! - `registry`: outstanding searches with retry budgets
//! - `coordinator`: server-side fan-out, federation flooding, replay
//! - `replies`: per-search result aggregation on the consumer side

pub mod coordinator;
pub mod registry;
pub mod replies;

pub use coordinator::SearchCoordinator;
pub use registry::{RequestError, RequestRegistry, SearchRequest};
pub use replies::{Reply, ReplyAggregator, ReplyError, SearchResult};
