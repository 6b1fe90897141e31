use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every dispatcher of a queue.
#[derive(Debug, Default)]
pub struct DispatchStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_expired: AtomicU64,
    cache_refresh_needed: AtomicU64,
    network_requests: AtomicU64,
    not_modified_suppressed: AtomicU64,
    responses_delivered: AtomicU64,
    errors_delivered: AtomicU64,
    cancelled_discarded: AtomicU64,
    cancelled_at_delivery: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_expired: u64,
    pub cache_refresh_needed: u64,
    pub network_requests: u64,
    pub not_modified_suppressed: u64,
    pub responses_delivered: u64,
    pub errors_delivered: u64,
    pub cancelled_discarded: u64,
    pub cancelled_at_delivery: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh or stale entry served from the cache.
    pub fn record_cache_hit(&self) {
        bump(&self.cache_hits);
    }

    pub fn record_cache_miss(&self) {
        bump(&self.cache_misses);
    }

    /// Entry found but past its hard expiry.
    pub fn record_cache_expired(&self) {
        bump(&self.cache_expired);
    }

    pub fn record_cache_refresh_needed(&self) {
        bump(&self.cache_refresh_needed);
    }

    pub fn record_network_request(&self) {
        bump(&self.network_requests);
    }

    pub fn record_not_modified_suppressed(&self) {
        bump(&self.not_modified_suppressed);
    }

    /// Result handed to the listener, intermediate ones included.
    pub fn record_response_delivered(&self) {
        bump(&self.responses_delivered);
    }

    pub fn record_error_delivered(&self) {
        bump(&self.errors_delivered);
    }

    /// Cancelled request dropped by a dispatcher at dequeue.
    pub fn record_cancelled_discarded(&self) {
        bump(&self.cancelled_discarded);
    }

    /// Result dropped by the delivery because the request was cancelled after
    /// its dispatcher posted it.
    pub fn record_cancelled_at_delivery(&self) {
        bump(&self.cancelled_at_delivery);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            cache_expired: load(&self.cache_expired),
            cache_refresh_needed: load(&self.cache_refresh_needed),
            network_requests: load(&self.network_requests),
            not_modified_suppressed: load(&self.not_modified_suppressed),
            responses_delivered: load(&self.responses_delivered),
            errors_delivered: load(&self.errors_delivered),
            cancelled_discarded: load(&self.cancelled_discarded),
            cancelled_at_delivery: load(&self.cancelled_at_delivery),
        }
    }
}
