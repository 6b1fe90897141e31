//! Hands parsed results and errors back to the caller's context.
use crate::{DispatchStats, RequestError, Response, request::Dispatch};
use futures::FutureExt as _;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Work to run once a response has been delivered.
pub type FollowUp = Box<dyn FnOnce() + Send + 'static>;

/// Posts results for a request. Implementations must not block the calling
/// dispatcher and must run each post exactly once.
pub trait ResponseDelivery: Send + Sync {
    /// Marks the request delivered, then delivers `response` and runs
    /// `follow_up` afterwards.
    fn post_response(
        &self,
        request: Arc<dyn Dispatch>,
        response: Response,
        follow_up: Option<FollowUp>,
    );

    fn post_error(&self, request: Arc<dyn Dispatch>, error: RequestError);
}

enum Outcome {
    Response(Response),
    Error(RequestError),
}

struct Delivery {
    request: Arc<dyn Dispatch>,
    outcome: Outcome,
    follow_up: Option<FollowUp>,
}

impl Delivery {
    fn response(
        request: Arc<dyn Dispatch>,
        response: Response,
        follow_up: Option<FollowUp>,
    ) -> Self {
        request.core().mark_delivered();
        Self {
            request,
            outcome: Outcome::Response(response),
            follow_up,
        }
    }

    fn error(request: Arc<dyn Dispatch>, error: RequestError) -> Self {
        Self {
            request,
            outcome: Outcome::Error(error),
            follow_up: None,
        }
    }

    fn run(self) {
        let Delivery {
            request,
            outcome,
            follow_up,
        } = self;
        let core = request.core();

        // cancelled while on its way here; the result is dropped
        if core.is_cancelled() {
            core.record_stat(DispatchStats::record_cancelled_at_delivery);
            core.finish("canceled-at-delivery");
            return;
        }
        let record: fn(&DispatchStats) = match &outcome {
            Outcome::Response(_) => DispatchStats::record_response_delivered,
            Outcome::Error(_) => DispatchStats::record_error_delivered,
        };
        core.record_stat(record);

        let intermediate = matches!(&outcome, Outcome::Response(r) if r.intermediate);
        let listener = std::panic::catch_unwind(AssertUnwindSafe(|| match outcome {
            Outcome::Response(response) => request.deliver_response(response),
            Outcome::Error(error) => request.deliver_error(error),
        }));
        if listener.is_err() {
            error!(url = %core.url(), "response listener panicked");
        }

        if intermediate {
            core.add_marker("intermediate-response");
        } else {
            core.finish("done");
        }

        if let Some(follow_up) = follow_up {
            follow_up();
        }
    }
}

/// Delivers on a dedicated tokio task fed by an unbounded channel, in posting
/// order.
pub struct ChannelDelivery {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl ChannelDelivery {
    /// Spawns the delivery task; must be called within a tokio runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Delivery>();
        tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                // `run` already shields the listener, this guards the bookkeeping
                if AssertUnwindSafe(async move { delivery.run() })
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!("delivery step panicked");
                }
            }
        });
        Self { sender }
    }

    fn post(&self, delivery: Delivery) {
        if let Err(mpsc::error::SendError(delivery)) = self.sender.send(delivery) {
            warn!("delivery task is gone, delivering inline");
            delivery.run();
        }
    }
}

impl ResponseDelivery for ChannelDelivery {
    fn post_response(
        &self,
        request: Arc<dyn Dispatch>,
        response: Response,
        follow_up: Option<FollowUp>,
    ) {
        self.post(Delivery::response(request, response, follow_up));
    }

    fn post_error(&self, request: Arc<dyn Dispatch>, error: RequestError) {
        self.post(Delivery::error(request, error));
    }
}

impl std::fmt::Debug for ChannelDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDelivery")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Delivers directly on the dispatcher task. Listeners must be quick.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDelivery;

impl ResponseDelivery for InlineDelivery {
    fn post_response(
        &self,
        request: Arc<dyn Dispatch>,
        response: Response,
        follow_up: Option<FollowUp>,
    ) {
        Delivery::response(request, response, follow_up).run();
    }

    fn post_error(&self, request: Arc<dyn Dispatch>, error: RequestError) {
        Delivery::error(request, error).run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkResponse, Parsed, Request, RequestHandler};
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };
    use tokio::sync::mpsc::UnboundedSender;

    struct Forward {
        tx: UnboundedSender<Result<String, String>>,
        panic_on_deliver: bool,
    }

    impl RequestHandler for Forward {
        type Output = String;

        fn parse_response(
            &self,
            response: &NetworkResponse,
        ) -> Result<Parsed<String>, RequestError> {
            Ok(Parsed::uncached(
                String::from_utf8_lossy(&response.data).into_owned(),
            ))
        }

        fn deliver_response(&self, output: String) {
            if self.panic_on_deliver {
                panic!("listener blew up");
            }
            let _ = self.tx.send(Ok(output));
        }

        fn deliver_error(&self, error: RequestError) {
            let _ = self.tx.send(Err(error.to_string()));
        }
    }

    fn request(
        panic_on_deliver: bool,
    ) -> (
        Arc<Request<Forward>>,
        mpsc::UnboundedReceiver<Result<String, String>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = Request::get(
            "http://example.com/",
            Forward {
                tx,
                panic_on_deliver,
            },
        )
        .unwrap();
        (Arc::new(request), rx)
    }

    #[tokio::test]
    async fn test_channel_delivery_in_order() {
        let delivery = ChannelDelivery::new();
        let (first, mut rx) = request(false);

        let response = Response::new("a".to_string(), None);
        delivery.post_response(first.clone(), response, None);
        assert!(first.has_had_response_delivered());
        delivery.post_error(first.clone(), RequestError::Timeout);

        assert_eq!(rx.recv().await.unwrap(), Ok("a".to_string()));
        assert_eq!(rx.recv().await.unwrap(), Err("request timed out".to_string()));
        assert!(first.is_finished());
    }

    #[tokio::test]
    async fn test_cancelled_request_not_delivered() {
        let (request, mut rx) = request(false);
        request.cancel();
        let response = Response::new("x".to_string(), None);
        InlineDelivery.post_response(request.clone(), response, None);

        assert!(rx.try_recv().is_err());
        assert!(request.is_finished());
        assert!(request.markers().contains(&"canceled-at-delivery".to_string()));
    }

    #[tokio::test]
    async fn test_intermediate_runs_follow_up_without_finishing() {
        let (request, mut rx) = request(false);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let mut response = Response::new("stale".to_string(), None);
        response.intermediate = true;
        InlineDelivery.post_response(
            request.clone(),
            response,
            Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
        );

        assert_eq!(rx.recv().await.unwrap(), Ok("stale".to_string()));
        assert!(ran.load(Ordering::SeqCst));
        assert!(!request.is_finished());
    }

    #[tokio::test]
    async fn test_panicking_listener_still_finishes() {
        let (request, _rx) = request(true);
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();

        InlineDelivery.post_response(
            request.clone(),
            Response::new("boom".to_string(), None),
            Some(Box::new(move || seen.lock().unwrap().push("follow-up"))),
        );

        assert!(request.is_finished());
        assert_eq!(*order.lock().unwrap(), vec!["follow-up"]);
    }
}
