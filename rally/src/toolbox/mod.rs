//! Ready-made request types and queue constructors.
mod download;
mod json;
mod string;

pub use download::DownloadHandler;
pub use json::JsonHandler;
pub use string::StringHandler;

use crate::{
    BasicNetwork, ChannelDelivery, HttpStack, RequestError, RequestQueue,
    RequestQueueOptions,
};
use rally_cache::DiskCache;
use rally_config::RallyConfig;
use std::{path::PathBuf, time::Duration};

pub type Listener<T> = Box<dyn Fn(T) + Send + Sync + 'static>;
pub type ErrorListener = Listener<RequestError>;

/// Started queue over a [`DiskCache`] in `cache_dir`, a [`BasicNetwork`] on
/// `stack` and a [`ChannelDelivery`]. Must be called within a tokio runtime.
pub fn new_request_queue(
    cache_dir: impl Into<PathBuf>,
    stack: impl HttpStack + 'static,
    config: &RallyConfig,
) -> RequestQueue {
    let cache = DiskCache::with_max_bytes(cache_dir, config.cache.max_bytes);
    let network = BasicNetwork::new(stack).with_slow_request_threshold(
        Duration::from_millis(config.http.slow_request_threshold_ms),
    );
    let queue = RequestQueue::new(
        cache,
        network,
        ChannelDelivery::new(),
        RequestQueueOptions::from(config),
    );
    queue.start();
    queue
}

/// [`new_request_queue`] over reqwest. The cache lives in `cache.directory`,
/// or under the system temp dir when unset.
#[cfg(feature = "http")]
pub fn new_default_request_queue(config: &RallyConfig) -> anyhow::Result<RequestQueue> {
    use anyhow::Context as _;

    let stack = crate::ReqwestStack::from_settings(&config.http)
        .context("failed to build http client")?;
    let cache_dir = config
        .cache
        .directory
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("rally"));
    Ok(new_request_queue(cache_dir, stack, config))
}
