pub use crate::{
    BasicNetwork, ChannelDelivery, Dispatch, HttpStack, InlineDelivery, Method,
    Network, NetworkResponse, Parsed, Request, RequestError, RequestHandler,
    RequestQueue, RequestQueueOptions, RequestQueueOptionsBuilder, ResponseDelivery,
    RetryPolicy, DefaultRetryPolicy, ProgressListener,
    toolbox::{DownloadHandler, JsonHandler, StringHandler},
};
pub use rally_cache::{Cache, CacheEntry, DiskCache, InMemoryCache, NoCache};
pub use rally_config::{Configurable, RallyConfig};
pub use rally_queue::Priority;

#[cfg(feature = "http")]
pub use crate::ReqwestStack;
