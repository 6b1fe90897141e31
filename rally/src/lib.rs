//! # rally
//!
//! Client-side request dispatch. Requests are added to a [`RequestQueue`],
//! resolved against a response cache by a single cache dispatcher, and sent to
//! the network by a fixed pool of network dispatchers. Results come back
//! through a [`ResponseDelivery`], exactly once per request.
//!
//! - duplicate requests (same cache key) are staged while one of them resolves,
//!   then released to hit the freshly written cache entry
//! - stale-while-revalidate: soft-expired entries are delivered immediately and
//!   refreshed in the background, a 304 suppresses the second delivery
//! - per-request [`RetryPolicy`] with growing attempt timeouts
//! - cooperative cancellation by request, tag or predicate
//!
//! ## Crates
//!
//! - `cache`: [`Cache`](cache::Cache) trait, memory and disk stores, HTTP cache headers
//! - `config`: YAML configuration and HTTP client parameters
//! - `queue`: priority ordered blocking queues
pub mod delivery;
mod dispatcher;
pub mod error;
pub mod logging;
pub mod marker;
pub mod network;
pub mod prelude;
pub mod progress;
pub mod request;
pub mod request_queue;
pub mod retry;
#[cfg(feature = "http")]
pub mod stack;
pub mod stats;
pub mod toolbox;

pub use delivery::{ChannelDelivery, FollowUp, InlineDelivery, ResponseDelivery};
pub use error::RequestError;
pub use network::{
    BasicNetwork, HttpStack, Network, NetworkResponse, RawResponse, TransportError,
};
pub use request::{
    Dispatch, Method, Parsed, Request, RequestCore, RequestHandler, Response,
};
pub use request_queue::{
    RequestQueue, RequestQueueOptions, RequestQueueOptionsBuilder,
    RequestQueueOptionsBuilderError,
};
pub use progress::{ProgressListener, ProgressReporter};
pub use retry::{DefaultRetryPolicy, RetryPolicy};
#[cfg(feature = "http")]
pub use stack::ReqwestStack;
pub use stats::{DispatchStats, StatsSnapshot};

pub use rally_cache as cache;
pub use rally_config as config;
pub use rally_queue as queue;
#[cfg(feature = "http")]
pub use reqwest;
// re-export
pub use async_trait;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
pub use tracing_subscriber;
