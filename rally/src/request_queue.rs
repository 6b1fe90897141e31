//! The request queue: admission, duplicate staging, bulk cancellation and the
//! dispatcher lifecycle.
use crate::{
    DispatchStats, StatsSnapshot,
    delivery::ResponseDelivery,
    dispatcher::{
        DispatcherContext, DispatcherHandle, spawn_cache_dispatcher,
        spawn_network_dispatcher,
    },
    network::Network,
    request::{Dispatch, RequestCore},
    retry::{DefaultRetryPolicy, RetryPolicy},
};
use derive_builder::Builder;
use rally_cache::Cache;
use rally_config::{QueueSettings, RallyConfig, RetrySettings};
use rally_queue::PriorityBlockingQueue;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, info, warn};

#[derive(Builder, Clone, Debug)]
#[builder(public, setter(into))]
pub struct RequestQueueOptions {
    /// Network dispatcher tasks, i.e. the bound on concurrent network calls
    #[builder(default = "4")]
    pub network_pool_size: usize,
    /// Retry policy given to every admitted request that has none of its own
    #[builder(default)]
    pub retry: RetrySettings,
}

impl Default for RequestQueueOptions {
    fn default() -> Self {
        Self {
            network_pool_size: 4,
            retry: RetrySettings::default(),
        }
    }
}

impl From<&QueueSettings> for RequestQueueOptions {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            network_pool_size: settings.network_pool_size,
            ..Self::default()
        }
    }
}

impl From<&RallyConfig> for RequestQueueOptions {
    fn from(config: &RallyConfig) -> Self {
        Self {
            network_pool_size: config.queue.network_pool_size,
            retry: config.retry.clone(),
        }
    }
}

type Staged = VecDeque<Arc<dyn Dispatch>>;

/// State shared between the queue facade, the dispatchers and the requests.
///
/// `waiting` and `current` are two independent lock domains; neither lock is
/// ever taken while the other is held.
pub(crate) struct QueueShared {
    sequence: AtomicU64,
    retry: RetrySettings,
    pub(crate) stats: Arc<DispatchStats>,
    pub(crate) cache_queue: PriorityBlockingQueue<Arc<dyn Dispatch>>,
    pub(crate) network_queue: PriorityBlockingQueue<Arc<dyn Dispatch>>,
    // key present: one request for it is resolving; the list holds duplicates
    waiting: Mutex<HashMap<String, Staged>>,
    current: Mutex<HashMap<u64, Arc<dyn Dispatch>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueueShared {
    fn new(retry: RetrySettings) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            retry,
            stats: Arc::new(DispatchStats::new()),
            cache_queue: PriorityBlockingQueue::new(),
            network_queue: PriorityBlockingQueue::new(),
            waiting: Mutex::new(HashMap::new()),
            current: Mutex::new(HashMap::new()),
        }
    }

    fn admit(self: &Arc<Self>, request: Arc<dyn Dispatch>) {
        let core = request.core();
        if !core.attach_queue(Arc::downgrade(self)) {
            warn!(url = %core.url(), "request was already added to a queue, ignored");
            return;
        }

        core.use_default_retry_policy(|| -> Box<dyn RetryPolicy> {
            Box::new(DefaultRetryPolicy::from(&self.retry))
        });
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        core.set_sequence(sequence);
        lock(&self.current).insert(sequence, Arc::clone(&request));
        core.add_marker("add-to-queue");

        if !core.should_cache() {
            self.network_queue.push(request);
            return;
        }

        let mut waiting = lock(&self.waiting);
        match waiting.get_mut(core.cache_key()) {
            Some(staged) => {
                staged.push_back(Arc::clone(&request));
                debug!(
                    cache_key = %core.cache_key(),
                    staged = staged.len(),
                    "request for a key in flight staged"
                );
            }
            None => {
                waiting.insert(core.cache_key().to_string(), VecDeque::new());
                self.cache_queue.push(request);
            }
        }
    }

    /// Called by the request itself, once, when it reaches a terminal state.
    pub(crate) fn finish(&self, core: &RequestCore) {
        lock(&self.current).remove(&core.sequence());

        if !core.should_cache() {
            return;
        }
        let staged = lock(&self.waiting).remove(core.cache_key());
        if let Some(staged) = staged.filter(|staged| !staged.is_empty()) {
            debug!(
                cache_key = %core.cache_key(),
                released = staged.len(),
                "releasing staged requests"
            );
            // not re-marked in flight: the cache was just primed for them
            self.cache_queue.push_all(staged);
        }
    }

    fn in_flight(&self) -> usize {
        lock(&self.current).len()
    }

    fn cancel_where(&self, predicate: impl Fn(&RequestCore) -> bool) -> usize {
        let current = lock(&self.current);
        let mut cancelled = 0;
        for request in current.values() {
            if predicate(request.core()) {
                request.core().cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Request dispatch facade. Owns the cache and network queues, stages
/// duplicate requests behind the one resolving their cache key, and runs one
/// cache dispatcher plus `network_pool_size` network dispatchers.
///
/// ```no_run
/// # use rally::prelude::*;
/// # async fn run(stack: impl HttpStack + 'static) {
/// let queue = RequestQueue::new(
///     InMemoryCache::new(),
///     BasicNetwork::new(stack),
///     ChannelDelivery::new(),
///     RequestQueueOptions::default(),
/// );
/// queue.start();
/// # }
/// ```
pub struct RequestQueue {
    shared: Arc<QueueShared>,
    cache: Arc<dyn Cache>,
    network: Arc<dyn Network>,
    delivery: Arc<dyn ResponseDelivery>,
    options: RequestQueueOptions,
    dispatchers: Mutex<Vec<DispatcherHandle>>,
}

impl RequestQueue {
    pub fn new(
        cache: impl Cache + 'static,
        network: impl Network + 'static,
        delivery: impl ResponseDelivery + 'static,
        options: RequestQueueOptions,
    ) -> Self {
        Self::new_from_arcs(
            Arc::new(cache),
            Arc::new(network),
            Arc::new(delivery),
            options,
        )
    }

    pub fn new_from_arcs(
        cache: Arc<dyn Cache>,
        network: Arc<dyn Network>,
        delivery: Arc<dyn ResponseDelivery>,
        options: RequestQueueOptions,
    ) -> Self {
        Self {
            shared: Arc::new(QueueShared::new(options.retry.clone())),
            cache,
            network,
            delivery,
            options,
            dispatchers: Mutex::new(Vec::new()),
        }
    }

    /// Starts the dispatchers, stopping any running ones first. Must be called
    /// within a tokio runtime.
    pub fn start(&self) {
        let ctx = DispatcherContext {
            queues: Arc::clone(&self.shared),
            cache: Arc::clone(&self.cache),
            network: Arc::clone(&self.network),
            delivery: Arc::clone(&self.delivery),
            stats: Arc::clone(&self.shared.stats),
        };
        let pool_size = self.options.network_pool_size.max(1);

        let mut dispatchers = lock(&self.dispatchers);
        for dispatcher in dispatchers.drain(..) {
            dispatcher.quit();
        }
        dispatchers.push(spawn_cache_dispatcher(ctx.clone()));
        for id in 1..=pool_size {
            dispatchers.push(spawn_network_dispatcher(id, ctx.clone()));
        }
        info!(network_pool_size = pool_size, "request queue started");
    }

    /// Asks every dispatcher to stop once its current request is done.
    pub fn stop(&self) {
        for dispatcher in lock(&self.dispatchers).iter() {
            dispatcher.quit();
        }
    }

    /// Stops the dispatchers and waits for their tasks to end.
    pub async fn shutdown(&self) {
        let dispatchers: Vec<_> = lock(&self.dispatchers).drain(..).collect();
        for dispatcher in &dispatchers {
            dispatcher.quit();
        }
        for dispatcher in dispatchers {
            dispatcher.join().await;
        }
        info!("request queue stopped");
    }

    /// Admits a request and returns it, so the caller keeps a handle to
    /// cancel it.
    pub fn add<R: Dispatch>(&self, request: Arc<R>) -> Arc<R> {
        let dispatch: Arc<dyn Dispatch> = request.clone();
        self.shared.admit(dispatch);
        request
    }

    /// Cancels every live request matching `predicate`; returns how many.
    pub fn cancel_all(&self, predicate: impl Fn(&RequestCore) -> bool) -> usize {
        self.shared.cancel_where(predicate)
    }

    pub fn cancel_all_tag(&self, tag: &str) -> usize {
        self.cancel_all(|core| core.tag().as_deref() == Some(tag))
    }

    /// Requests added and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn options(&self) -> &RequestQueueOptions {
        &self.options
    }

    #[cfg(test)]
    pub(crate) fn cache_queue_len(&self) -> usize {
        self.shared.cache_queue.len()
    }

    #[cfg(test)]
    pub(crate) fn network_queue_len(&self) -> usize {
        self.shared.network_queue.len()
    }

    #[cfg(test)]
    pub(crate) fn staged_for(&self, cache_key: &str) -> Option<usize> {
        lock(&self.shared.waiting).get(cache_key).map(VecDeque::len)
    }

    #[cfg(test)]
    pub(crate) fn take_cache_queue(&self) -> Vec<Arc<dyn Dispatch>> {
        self.shared.cache_queue.drain()
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("options", &self.options)
            .field("in_flight", &self.in_flight())
            .field("dispatchers", &lock(&self.dispatchers).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        InlineDelivery, NetworkResponse, Parsed, Request, RequestError,
        RequestHandler,
    };
    use async_trait::async_trait;
    use rally_cache::NoCache;
    use rally_queue::Priority;
    use std::time::Duration;

    struct Unreachable;

    #[async_trait]
    impl Network for Unreachable {
        async fn perform_request(
            &self,
            _request: &RequestCore,
        ) -> Result<NetworkResponse, RequestError> {
            Err(RequestError::NoConnection("offline".to_string()))
        }
    }

    struct Noop;

    impl RequestHandler for Noop {
        type Output = ();

        fn parse_response(
            &self,
            _: &NetworkResponse,
        ) -> Result<Parsed<()>, RequestError> {
            Ok(Parsed::uncached(()))
        }

        fn deliver_response(&self, _: ()) {}

        fn deliver_error(&self, _: RequestError) {}
    }

    // dispatchers are never started: the queues can be inspected directly
    fn queue() -> RequestQueue {
        RequestQueue::new(
            NoCache,
            Unreachable,
            InlineDelivery,
            RequestQueueOptions::default(),
        )
    }

    fn get(url: &str) -> Arc<Request<Noop>> {
        Arc::new(Request::get(url, Noop).unwrap())
    }

    #[test]
    fn test_duplicate_key_is_staged_then_released_to_cache_queue() {
        let queue = queue();
        let first = queue.add(get("http://example.com/a"));
        let second = queue.add(get("http://example.com/a"));

        assert_eq!(first.sequence(), 1);
        assert_eq!(second.sequence(), 2);
        assert_eq!(queue.cache_queue_len(), 1);
        assert_eq!(queue.staged_for("GET:http://example.com/a"), Some(1));
        assert_eq!(queue.in_flight(), 2);

        let taken = queue.take_cache_queue();
        assert_eq!(taken[0].core().sequence(), first.sequence());

        first.finish("done");
        assert_eq!(queue.staged_for("GET:http://example.com/a"), None);
        assert_eq!(queue.cache_queue_len(), 1);
        assert_eq!(queue.network_queue_len(), 0);
        assert_eq!(queue.take_cache_queue()[0].core().sequence(), second.sequence());
        assert_eq!(queue.in_flight(), 1);
    }

    #[test]
    fn test_uncacheable_goes_straight_to_network() {
        let queue = queue();
        queue.add(Arc::new(
            Request::get("http://example.com/a", Noop)
                .unwrap()
                .with_should_cache(false),
        ));
        assert_eq!(queue.network_queue_len(), 1);
        assert_eq!(queue.cache_queue_len(), 0);
        assert_eq!(queue.staged_for("GET:http://example.com/a"), None);
    }

    #[test]
    fn test_distinct_keys_are_not_staged() {
        let queue = queue();
        queue.add(get("http://example.com/a"));
        queue.add(get("http://example.com/b"));
        assert_eq!(queue.cache_queue_len(), 2);
    }

    #[test]
    fn test_cache_queue_ordering() {
        let queue = queue();
        let urls = [
            "http://e.com/1",
            "http://e.com/2",
            "http://e.com/3",
            "http://e.com/4",
        ];
        let priorities = [
            Priority::Low,
            Priority::High,
            Priority::Normal,
            Priority::High,
        ];
        for (url, priority) in urls.iter().zip(priorities) {
            queue.add(Arc::new(
                Request::get(url, Noop).unwrap().with_priority(priority),
            ));
        }

        let order: Vec<String> = queue
            .take_cache_queue()
            .iter()
            .map(|r| r.core().url().to_string())
            .collect();
        assert_eq!(
            order,
            vec!["http://e.com/2", "http://e.com/4", "http://e.com/3", "http://e.com/1"]
        );
    }

    #[test]
    fn test_finish_twice_is_noop() {
        let queue = queue();
        let first = queue.add(get("http://example.com/a"));
        let second = queue.add(get("http://example.com/a"));
        queue.take_cache_queue();

        first.finish("done");
        // a new request claims the key again; a repeated finish must not release it
        let third = queue.add(get("http://example.com/a"));
        first.finish("done");
        assert_eq!(queue.staged_for("GET:http://example.com/a"), Some(0));
        assert_eq!(queue.cache_queue_len(), 2);
        assert!(!second.is_finished());
        assert!(!third.is_finished());
    }

    #[test]
    fn test_added_twice_is_ignored() {
        let queue = queue();
        let request = queue.add(get("http://example.com/a"));
        queue.add(request.clone());
        assert_eq!(queue.in_flight(), 1);
        assert_eq!(request.sequence(), 1);
    }

    #[test]
    fn test_cancel_all_by_tag_and_predicate() {
        let queue = queue();
        let tagged = queue.add(Arc::new(
            Request::get("http://example.com/a", Noop).unwrap().with_tag("screen"),
        ));
        let other = queue.add(get("http://example.com/b"));

        assert_eq!(queue.cancel_all_tag("screen"), 1);
        assert!(tagged.is_cancelled());
        assert!(!other.is_cancelled());

        assert_eq!(queue.cancel_all(|core| core.url().ends_with("/b")), 1);
        assert!(other.is_cancelled());
        // cancellation alone does not finish
        assert_eq!(queue.in_flight(), 2);
    }

    #[test]
    fn test_options_builder() {
        let options = RequestQueueOptionsBuilder::default().build().unwrap();
        assert_eq!(options.network_pool_size, 4);
        let options = RequestQueueOptionsBuilder::default()
            .network_pool_size(2usize)
            .build()
            .unwrap();
        assert_eq!(options.network_pool_size, 2);
        let settings = QueueSettings {
            network_pool_size: 9,
        };
        assert_eq!(RequestQueueOptions::from(&settings).network_pool_size, 9);
    }

    #[test]
    fn test_options_from_config_carry_retry_settings() {
        let mut config = RallyConfig::default();
        config.queue.network_pool_size = 2;
        config.retry.max_retries = 3;
        let options = RequestQueueOptions::from(&config);
        assert_eq!(options.network_pool_size, 2);
        assert_eq!(options.retry.max_retries, 3);
        assert_eq!(options.retry.initial_timeout_ms, 2500);
    }

    #[test]
    fn test_admit_installs_queue_retry_policy() {
        let options = RequestQueueOptions {
            retry: RetrySettings {
                initial_timeout_ms: 50,
                max_retries: 3,
                backoff_multiplier: 2.0,
            },
            ..RequestQueueOptions::default()
        };
        let queue = RequestQueue::new(NoCache, Unreachable, InlineDelivery, options);

        let plain = queue.add(get("http://example.com/a"));
        assert_eq!(plain.timeout(), Duration::from_millis(50));

        let own = queue.add(Arc::new(
            Request::get("http://example.com/b", Noop)
                .unwrap()
                .with_retry_policy(DefaultRetryPolicy::new(
                    Duration::from_secs(7),
                    0,
                    1.0,
                )),
        ));
        assert_eq!(own.timeout(), Duration::from_secs(7));
    }
}
