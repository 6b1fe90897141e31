//! One logical network call per request: conditional headers, per-attempt
//! deadlines, retries and status mapping on top of a single-attempt
//! [`HttpStack`].
use crate::{RequestError, request::RequestCore};
use async_trait::async_trait;
use rally_cache::{CacheEntry, format_http_date};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

pub const DEFAULT_SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(3000);

/// Response handed to request parsers.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub data: Vec<u8>,
    /// Server answered 304; `data` is the cached body, if there was one.
    pub not_modified: bool,
    pub network_time: Duration,
}

impl NetworkResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, data: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            data,
            not_modified: false,
            network_time: Duration::ZERO,
        }
    }

    /// Replays a cached entry as a plain 200.
    pub fn from_cache_entry(entry: &CacheEntry) -> Self {
        Self::new(200, entry.headers.clone(), entry.data.clone())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        rally_cache::header_value(&self.headers, name)
    }
}

/// What the transport got back from one attempt. `body` is `None` when no
/// body could be obtained at all.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("attempt timed out")]
    Timeout,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("bad url: {0}")]
    BadUrl(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("failed to read response body: {message}")]
    Body { status: Option<u16>, message: String },
}

/// Performs exactly one physical HTTP attempt.
#[async_trait]
pub trait HttpStack: Send + Sync {
    async fn perform_once(
        &self,
        request: &RequestCore,
        extra_headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;
}

/// Performs a logical network call, retrying internally as the request's
/// retry policy allows.
#[async_trait]
pub trait Network: Send + Sync {
    async fn perform_request(
        &self,
        request: &RequestCore,
    ) -> Result<NetworkResponse, RequestError>;
}

pub struct BasicNetwork {
    stack: Arc<dyn HttpStack>,
    slow_request_threshold: Duration,
}

impl BasicNetwork {
    pub fn new(stack: impl HttpStack + 'static) -> Self {
        Self::from_arc(Arc::new(stack))
    }

    pub fn from_arc(stack: Arc<dyn HttpStack>) -> Self {
        Self {
            stack,
            slow_request_threshold: DEFAULT_SLOW_REQUEST_THRESHOLD,
        }
    }

    pub fn with_slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold = threshold;
        self
    }

    fn log_slow_request(
        &self,
        request: &RequestCore,
        elapsed: Duration,
        status: u16,
        size: Option<usize>,
    ) {
        if elapsed > self.slow_request_threshold {
            debug!(
                url = %request.url(),
                elapsed_ms = elapsed.as_millis() as u64,
                size = ?size,
                status,
                retries = request.retry_count(),
                "slow http request"
            );
        }
    }
}

/// Validators of the attached entry as conditional request headers.
pub(crate) fn cache_headers(entry: Option<&CacheEntry>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let Some(entry) = entry else {
        return headers;
    };
    if let Some(etag) = &entry.etag {
        headers.insert("If-None-Match".to_string(), etag.clone());
    }
    if let Some(date) = entry.last_modified.or(entry.server_date) {
        headers.insert("If-Modified-Since".to_string(), format_http_date(date));
    }
    headers
}

fn not_modified_response(
    entry: Option<&CacheEntry>,
    headers: HashMap<String, String>,
    network_time: Duration,
) -> NetworkResponse {
    let (merged, data) = match entry {
        // fresh headers win over cached ones, names compared case-insensitively
        Some(entry) => {
            let mut merged = entry.headers.clone();
            merged.retain(|name, _| {
                !headers.keys().any(|fresh| fresh.eq_ignore_ascii_case(name))
            });
            merged.extend(headers);
            (merged, entry.data.clone())
        }
        None => (headers, Vec::new()),
    };
    NetworkResponse {
        status: 304,
        headers: merged,
        data,
        not_modified: true,
        network_time,
    }
}

/// Hands a retryable failure to the retry policy, leaving a marker either way.
fn attempt_retry(
    log_prefix: &str,
    request: &RequestCore,
    error: RequestError,
) -> Result<(), RequestError> {
    let timeout_ms = request.timeout().as_millis();
    match request.retry(error) {
        Ok(()) => {
            request.add_marker(format!("{log_prefix}-retry [timeout={timeout_ms}]"));
            Ok(())
        }
        Err(error) => {
            request.add_marker(format!(
                "{log_prefix}-timeout-giveup [timeout={timeout_ms}]"
            ));
            Err(error)
        }
    }
}

#[async_trait]
impl Network for BasicNetwork {
    async fn perform_request(
        &self,
        request: &RequestCore,
    ) -> Result<NetworkResponse, RequestError> {
        let started = Instant::now();
        loop {
            let entry = request.cache_entry();
            let extra_headers = cache_headers(entry.as_ref());
            let timeout = request.timeout();

            let attempt = tokio::time::timeout(
                timeout,
                self.stack.perform_once(request, &extra_headers, timeout),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout));

            let raw = match attempt {
                Ok(raw) => raw,
                Err(TransportError::Timeout) => {
                    attempt_retry("socket", request, RequestError::Timeout)?;
                    continue;
                }
                Err(TransportError::ConnectTimeout) => {
                    attempt_retry("connection", request, RequestError::Timeout)?;
                    continue;
                }
                Err(TransportError::BadUrl(url)) => {
                    return Err(RequestError::BadUrl(url));
                }
                Err(TransportError::Connection(message)) => {
                    return Err(RequestError::NoConnection(message));
                }
                Err(TransportError::Body { status, .. }) => {
                    return Err(RequestError::Network { status });
                }
            };

            let elapsed = started.elapsed();
            let status = raw.status;
            self.log_slow_request(
                request,
                elapsed,
                status,
                raw.body.as_ref().map(Vec::len),
            );

            if status == 304 {
                return Ok(not_modified_response(entry.as_ref(), raw.headers, elapsed));
            }

            if (200..300).contains(&status) {
                return Ok(NetworkResponse {
                    status,
                    headers: raw.headers,
                    data: raw.body.unwrap_or_default(),
                    not_modified: false,
                    network_time: elapsed,
                });
            }

            let Some(data) = raw.body else {
                return Err(RequestError::Network {
                    status: Some(status),
                });
            };
            let response = NetworkResponse {
                status,
                headers: raw.headers,
                data,
                not_modified: false,
                network_time: elapsed,
            };
            match status {
                401 | 403 => {
                    attempt_retry("auth", request, RequestError::AuthFailure(response))?
                }
                _ => return Err(RequestError::Server(response)),
            }
        }
    }
}
