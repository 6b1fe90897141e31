//! Requests: the shared dispatch state ([`RequestCore`]), the per-type parsing
//! and delivery hooks ([`RequestHandler`]), and the type-erased view the queue
//! works with ([`Dispatch`]).
use crate::{
    DispatchStats, RequestError,
    marker::MarkerLog,
    network::NetworkResponse,
    progress::ProgressListener,
    request_queue::QueueShared,
    retry::{DefaultRetryPolicy, RetryPolicy},
};
use rally_cache::CacheEntry;
use rally_queue::{Prioritized, Priority};
use std::{
    any::Any,
    collections::HashMap,
    fmt,
    ops::Deref,
    sync::{
        Mutex, MutexGuard, OnceLock, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State every request carries through the queue, independent of its result
/// type. Identity (method, URL, headers, body, cache key) is fixed once the
/// request is built; the rest is updated by the queue and the dispatchers.
pub struct RequestCore {
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    body_content_type: Option<String>,
    cache_key: String,
    should_cache: bool,
    priority: AtomicU8,
    // 0 until the queue assigns one
    sequence: AtomicU64,
    tag: Mutex<Option<String>>,
    cancelled: AtomicBool,
    delivered: AtomicBool,
    finished: AtomicBool,
    cache_entry: Mutex<Option<CacheEntry>>,
    retry_policy: Mutex<Box<dyn RetryPolicy>>,
    // set by `with_retry_policy`; the queue default is not applied then
    custom_retry_policy: bool,
    progress_listener: Option<Box<dyn ProgressListener>>,
    markers: Mutex<MarkerLog>,
    created_at: Instant,
    queue: OnceLock<Weak<QueueShared>>,
}

impl RequestCore {
    fn new(method: Method, url: &str) -> Result<Self, RequestError> {
        let url = url::Url::parse(url)
            .map_err(|e| RequestError::BadUrl(format!("{url}: {e}")))?
            .to_string();
        Ok(Self {
            cache_key: format!("{method}:{url}"),
            should_cache: method == Method::Get,
            method,
            url,
            headers: HashMap::new(),
            body: None,
            body_content_type: None,
            priority: AtomicU8::new(Priority::default().as_u8()),
            sequence: AtomicU64::new(0),
            tag: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cache_entry: Mutex::new(None),
            retry_policy: Mutex::new(Box::new(DefaultRetryPolicy::default())),
            custom_retry_policy: false,
            progress_listener: None,
            markers: Mutex::new(MarkerLog::new()),
            created_at: Instant::now(),
            queue: OnceLock::new(),
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn body_content_type(&self) -> Option<&str> {
        self.body_content_type.as_deref()
    }

    /// Key the response is cached under; requests sharing it are deduplicated.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn should_cache(&self) -> bool {
        self.should_cache
    }

    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.priority.load(Ordering::Relaxed))
    }

    /// Only affects queues the request is pushed to afterwards.
    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority.as_u8(), Ordering::Relaxed);
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub(crate) fn set_sequence(&self, sequence: u64) {
        self.sequence.store(sequence, Ordering::Release);
    }

    pub fn tag(&self) -> Option<String> {
        lock(&self.tag).clone()
    }

    pub fn set_tag(&self, tag: impl Into<String>) {
        *lock(&self.tag) = Some(tag.into());
    }

    /// Advisory: the request is dropped at the next dispatch step that checks.
    /// A network call already in progress completes, its result is discarded.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.add_marker("cancel");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_delivered(&self) {
        self.delivered.store(true, Ordering::Release);
    }

    pub fn has_had_response_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Cache entry attached by the cache dispatcher, used for conditional
    /// headers and for answering a 304.
    pub fn cache_entry(&self) -> Option<CacheEntry> {
        lock(&self.cache_entry).clone()
    }

    pub(crate) fn set_cache_entry(&self, entry: Option<CacheEntry>) {
        *lock(&self.cache_entry) = entry;
    }

    pub fn timeout(&self) -> Duration {
        lock(&self.retry_policy).current_timeout()
    }

    pub fn retry_count(&self) -> u32 {
        lock(&self.retry_policy).current_retry_count()
    }

    pub(crate) fn retry(&self, error: RequestError) -> Result<(), RequestError> {
        lock(&self.retry_policy).retry(error)
    }

    /// Installs the queue's retry policy unless the request brought its own.
    pub(crate) fn use_default_retry_policy(
        &self,
        policy: impl FnOnce() -> Box<dyn RetryPolicy>,
    ) {
        if !self.custom_retry_policy {
            *lock(&self.retry_policy) = policy();
        }
    }

    pub fn progress_listener(&self) -> Option<&dyn ProgressListener> {
        self.progress_listener.as_deref()
    }

    pub fn add_marker(&self, name: impl Into<String>) {
        lock(&self.markers).add(name, self.sequence());
    }

    pub fn markers(&self) -> Vec<String> {
        lock(&self.markers)
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Returns false when the request already belongs to a queue.
    pub(crate) fn attach_queue(&self, queue: Weak<QueueShared>) -> bool {
        self.queue.set(queue).is_ok()
    }

    pub(crate) fn record_stat(&self, record: impl FnOnce(&DispatchStats)) {
        if let Some(queue) = self.queue.get().and_then(Weak::upgrade) {
            record(&*queue.stats);
        }
    }

    /// Terminal step: releases the queue bookkeeping and closes the marker log.
    /// Later calls are no-ops.
    pub fn finish(&self, marker: &str) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut markers = lock(&self.markers);
            markers.add(marker, self.sequence());
            markers.finish(&format!("{} {}", self.method, self.url));
        }
        if let Some(queue) = self.queue.get().and_then(Weak::upgrade) {
            queue.finish(self);
        }
    }
}

impl fmt::Debug for RequestCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCore")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("cache_key", &self.cache_key)
            .field("priority", &self.priority())
            .field("sequence", &self.sequence())
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Parsed result plus the cache entry to store for it, if any.
#[derive(Debug)]
pub struct Parsed<T> {
    pub result: T,
    pub cache_entry: Option<CacheEntry>,
}

impl<T> Parsed<T> {
    pub fn new(result: T, cache_entry: Option<CacheEntry>) -> Self {
        Self {
            result,
            cache_entry,
        }
    }

    pub fn uncached(result: T) -> Self {
        Self::new(result, None)
    }
}

/// Parsing and delivery hooks of one request type.
///
/// `parse_response` runs on a dispatcher task, the `deliver_*` hooks run in the
/// delivery context. Exactly one `deliver_*` call happens per request unless it
/// is cancelled, a stale cache hit followed by a changed response being the one
/// case with two `deliver_response` calls.
pub trait RequestHandler: Send + Sync + 'static {
    type Output: Send + 'static;

    fn parse_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Parsed<Self::Output>, RequestError>;

    /// Gives the request a chance to refine errors coming from the network.
    fn parse_error(&self, error: RequestError) -> RequestError {
        error
    }

    fn deliver_response(&self, output: Self::Output);

    fn deliver_error(&self, error: RequestError);
}

/// Type-erased parse result moving from a dispatcher to the delivery.
pub struct Response {
    result: Box<dyn Any + Send>,
    pub cache_entry: Option<CacheEntry>,
    /// More responses for the same request follow (stale cache hit).
    pub intermediate: bool,
}

impl Response {
    pub fn new<T: Send + 'static>(result: T, cache_entry: Option<CacheEntry>) -> Self {
        Self {
            result: Box::new(result),
            cache_entry,
            intermediate: false,
        }
    }

    /// Recovers the typed result, handing the response back on a type mismatch.
    pub fn into_result<T: 'static>(self) -> Result<T, Self> {
        match self.result.downcast::<T>() {
            Ok(result) => Ok(*result),
            Err(result) => Err(Self { result, ..self }),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("cache_entry", &self.cache_entry.is_some())
            .field("intermediate", &self.intermediate)
            .finish_non_exhaustive()
    }
}

/// Object-safe view of a request used by the queue, dispatchers and delivery.
pub trait Dispatch: Send + Sync + 'static {
    fn core(&self) -> &RequestCore;

    fn parse_network_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Response, RequestError>;

    fn parse_network_error(&self, error: RequestError) -> RequestError;

    fn deliver_response(&self, response: Response);

    fn deliver_error(&self, error: RequestError);
}

impl Prioritized for dyn Dispatch {
    fn priority(&self) -> Priority {
        self.core().priority()
    }

    fn sequence(&self) -> u64 {
        self.core().sequence()
    }
}

impl fmt::Debug for dyn Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core().fmt(f)
    }
}

/// A request: dispatch state plus the handler that parses and delivers its
/// result. Derefs to [`RequestCore`].
pub struct Request<H> {
    core: RequestCore,
    handler: H,
}

impl<H> Request<H>
where
    H: RequestHandler,
{
    pub fn new(method: Method, url: &str, handler: H) -> Result<Self, RequestError> {
        Ok(Self {
            core: RequestCore::new(method, url)?,
            handler,
        })
    }

    pub fn get(url: &str, handler: H) -> Result<Self, RequestError> {
        Self::new(Method::Get, url, handler)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn with_priority(self, priority: Priority) -> Self {
        self.core.set_priority(priority);
        self
    }

    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        self.core.set_tag(tag);
        self
    }

    pub fn with_should_cache(mut self, should_cache: bool) -> Self {
        self.core.should_cache = should_cache;
        self
    }

    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.core.cache_key = cache_key.into();
        self
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.core.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        self.core.body_content_type = Some(content_type.into());
        self.core.body = Some(body);
        self
    }

    /// URL-encoded form body.
    pub fn with_form_params<K, V>(self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        self.with_body(FORM_CONTENT_TYPE, body.into_bytes())
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.core.retry_policy = Mutex::new(Box::new(policy));
        self.core.custom_retry_policy = true;
        self
    }

    /// Reports body download progress; see [`ProgressReporter`] for the rate.
    ///
    /// [`ProgressReporter`]: crate::progress::ProgressReporter
    pub fn with_progress_listener(
        mut self,
        listener: impl ProgressListener + 'static,
    ) -> Self {
        self.core.progress_listener = Some(Box::new(listener));
        self
    }
}

impl<H> Deref for Request<H> {
    type Target = RequestCore;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl<H> fmt::Debug for Request<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt(f)
    }
}

impl<H> Dispatch for Request<H>
where
    H: RequestHandler,
{
    fn core(&self) -> &RequestCore {
        &self.core
    }

    fn parse_network_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Response, RequestError> {
        self.handler
            .parse_response(response)
            .map(|parsed| Response::new(parsed.result, parsed.cache_entry))
    }

    fn parse_network_error(&self, error: RequestError) -> RequestError {
        self.handler.parse_error(error)
    }

    fn deliver_response(&self, response: Response) {
        match response.into_result::<H::Output>() {
            Ok(output) => self.handler.deliver_response(output),
            Err(_) => {
                tracing::error!(
                    url = %self.core.url,
                    "response type does not match the request"
                );
                self.handler.deliver_error(RequestError::Unexpected(
                    "response type mismatch".to_string(),
                ));
            }
        }
    }

    fn deliver_error(&self, error: RequestError) {
        self.handler.deliver_error(error)
    }
}
