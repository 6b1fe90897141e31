//! Response cache for rally.
//!
//! The dispatchers only talk to the [`Cache`] trait. Three stores ship with the
//! crate:
//! - [`InMemoryCache`]: LRU bounded by body bytes
//! - [`DiskCache`]: one file per key, LRU index rebuilt on `initialize`
//! - [`NoCache`]: never stores anything
//!
//! [`parse_cache_headers`] turns HTTP response headers into a [`CacheEntry`]
//! with soft (serve stale, revalidate) and hard expiry times.

mod cache;
mod disk;
mod error;
mod headers;
mod http_cache;
mod memory;

pub use cache::CacheEntry;
pub use disk::DiskCache;
pub use error::CacheError;
pub use headers::{
    format_http_date, header_value, parse_cache_headers, parse_cache_headers_at,
    parse_charset, parse_http_date,
};
pub use http_cache::{Cache, NoCache};
pub use memory::InMemoryCache;
