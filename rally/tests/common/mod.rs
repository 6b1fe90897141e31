#![allow(dead_code)]
use async_trait::async_trait;
use rally::{
    BasicNetwork, ChannelDelivery, HttpStack, NetworkResponse, Parsed,
    ProgressReporter, RawResponse, Request, RequestCore, RequestError,
    RequestHandler, RequestQueue, RequestQueueOptions, TransportError,
    cache::{Cache, parse_cache_headers},
    config::RetrySettings,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone)]
pub enum Reply {
    Respond(RawResponse),
    /// 200 whose body arrives in `chunks`, each after `pause`
    Chunked {
        chunks: Vec<&'static str>,
        pause: Duration,
    },
    Fail(TransportError),
    Panic,
}

pub fn respond(status: u16, headers: &[(&str, &str)], body: Option<&str>) -> Reply {
    Reply::Respond(RawResponse {
        status,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: body.map(|b| b.as_bytes().to_vec()),
    })
}

pub fn cacheable(body: &str) -> Reply {
    respond(200, &[("Cache-Control", "max-age=60"), ("ETag", "\"v2\"")], Some(body))
}

#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub extra_headers: HashMap<String, String>,
    pub timeout: Duration,
}

/// Transport scripted per URL. The last reply of a script repeats forever; a
/// URL without a script fails to connect.
#[derive(Default)]
pub struct MockStack {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
    active: Mutex<HashMap<String, usize>>,
    max_active: Mutex<HashMap<String, usize>>,
    peak: Mutex<(usize, usize)>,
    delay: Duration,
}

impl MockStack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn script(&self, url: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.url == url).collect()
    }

    pub fn max_concurrent(&self, url: &str) -> usize {
        self.max_active
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of calls in progress at once, across all URLs.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.lock().unwrap().1
    }

    fn next_reply(&self, url: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let script = routes.get_mut(url)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl HttpStack for MockStack {
    async fn perform_once(
        &self,
        request: &RequestCore,
        extra_headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let url = request.url().to_string();
        self.calls.lock().unwrap().push(Call {
            url: url.clone(),
            extra_headers: extra_headers.clone(),
            timeout,
        });
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(url.clone()).or_default();
            *count += 1;
            let mut max_active = self.max_active.lock().unwrap();
            let max = max_active.entry(url.clone()).or_default();
            *max = (*max).max(*count);
            let mut peak = self.peak.lock().unwrap();
            peak.0 += 1;
            peak.1 = peak.1.max(peak.0);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.next_reply(&url);
        *self.active.lock().unwrap().entry(url.clone()).or_default() -= 1;
        self.peak.lock().unwrap().0 -= 1;

        match reply {
            Some(Reply::Respond(raw)) => Ok(raw),
            Some(Reply::Chunked { chunks, pause }) => {
                let total: u64 = chunks.iter().map(|c| c.len() as u64).sum();
                let mut progress = ProgressReporter::start(request, Some(total));
                let mut body = Vec::new();
                for chunk in chunks {
                    tokio::time::sleep(pause).await;
                    progress.advance(chunk.len());
                    body.extend_from_slice(chunk.as_bytes());
                }
                progress.finish();
                Ok(RawResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: Some(body),
                })
            }
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Panic) => panic!("transport blew up"),
            None => Err(TransportError::Connection(format!("no route to {url}"))),
        }
    }
}

pub type Outcome = Result<String, RequestError>;

/// Forwards deliveries into a channel; can be told to panic while parsing.
pub struct ChannelHandler {
    tx: UnboundedSender<Outcome>,
    panic_on_parse: bool,
}

impl RequestHandler for ChannelHandler {
    type Output = String;

    fn parse_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Parsed<String>, RequestError> {
        if self.panic_on_parse {
            panic!("parser blew up");
        }
        Ok(Parsed::new(
            String::from_utf8_lossy(&response.data).into_owned(),
            parse_cache_headers(&response.headers, &response.data),
        ))
    }

    fn deliver_response(&self, output: String) {
        let _ = self.tx.send(Ok(output));
    }

    fn deliver_error(&self, error: RequestError) {
        let _ = self.tx.send(Err(error));
    }
}

pub fn channel_request(
    url: &str,
) -> (Request<ChannelHandler>, UnboundedReceiver<Outcome>) {
    handler_request(url, false)
}

pub fn panicking_request(
    url: &str,
) -> (Request<ChannelHandler>, UnboundedReceiver<Outcome>) {
    handler_request(url, true)
}

fn handler_request(
    url: &str,
    panic_on_parse: bool,
) -> (Request<ChannelHandler>, UnboundedReceiver<Outcome>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let request = Request::get(url, ChannelHandler { tx, panic_on_parse }).unwrap();
    (request, rx)
}

pub fn queue(
    cache: Arc<dyn Cache>,
    stack: Arc<MockStack>,
    pool: usize,
) -> RequestQueue {
    RequestQueue::new_from_arcs(
        cache,
        Arc::new(BasicNetwork::from_arc(stack)),
        Arc::new(ChannelDelivery::new()),
        RequestQueueOptions {
            network_pool_size: pool,
            ..RequestQueueOptions::default()
        },
    )
}

/// Like [`queue`], with the given default retry policy.
pub fn queue_with_retry(
    cache: Arc<dyn Cache>,
    stack: Arc<MockStack>,
    retry: RetrySettings,
) -> RequestQueue {
    RequestQueue::new_from_arcs(
        cache,
        Arc::new(BasicNetwork::from_arc(stack)),
        Arc::new(ChannelDelivery::new()),
        RequestQueueOptions {
            network_pool_size: 1,
            retry,
        },
    )
}

pub async fn next(rx: &mut UnboundedReceiver<Outcome>) -> Outcome {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no delivery within 5s")
        .expect("delivery channel closed")
}

pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
