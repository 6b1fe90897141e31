#![deny(clippy::unwrap_used)]
use super::{DispatcherContext, DispatcherHandle, QuitSignal, panic_message};
use crate::{RequestError, request::Dispatch};
use futures::FutureExt as _;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

pub(crate) fn spawn_network_dispatcher(
    id: usize,
    ctx: DispatcherContext,
) -> DispatcherHandle {
    let span = info_span!("dispatcher", kind = "network", dispatcher_id = id);
    DispatcherHandle::spawn(format!("network-{id}"), move |signal| {
        network_dispatcher(id, ctx, signal).instrument(span)
    })
}

/// Drains the network queue: performs the call, stores the result in the
/// cache and posts it. A failing request never ends the loop.
#[instrument(name = "network_dispatcher", skip_all, fields(dispatcher_id = id))]
async fn network_dispatcher(
    id: usize,
    ctx: DispatcherContext,
    signal: Arc<QuitSignal>,
) {
    info!("network dispatcher started");

    loop {
        let request = tokio::select! {
            biased;
            _ = signal.interrupted() => {
                if signal.is_quit() {
                    break;
                }
                continue;
            }
            request = ctx.queues.network_queue.pop() => request,
        };

        let outcome = AssertUnwindSafe(process(&ctx, Arc::clone(&request)))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let message = panic_message(&*panic);
            error!(
                url = %request.core().url(),
                %message,
                "unhandled panic in network dispatcher"
            );
            let core = request.core();
            core.add_marker("network-unexpected-error");
            ctx.delivery
                .post_error(request, RequestError::Unexpected(message));
        }
    }

    info!("network dispatcher stopped");
}

async fn process(ctx: &DispatcherContext, request: Arc<dyn Dispatch>) {
    let core = request.core();
    core.add_marker("network-queue-take");

    // last check before the call; once issued it is never interrupted
    if core.is_cancelled() {
        ctx.stats.record_cancelled_discarded();
        core.finish("network-discard-cancelled");
        return;
    }

    ctx.stats.record_network_request();
    let network_response = match ctx.network.perform_request(core).await {
        Ok(response) => response,
        Err(error) => {
            core.add_marker("network-error");
            debug!(url = %core.url(), error = %error, "network request failed");
            let error = request.parse_network_error(error);
            ctx.delivery.post_error(request, error);
            return;
        }
    };
    core.add_marker("network-http-complete");

    // revalidation of a stale hit that was already delivered
    if network_response.not_modified && core.has_had_response_delivered() {
        ctx.stats.record_not_modified_suppressed();
        core.finish("not-modified");
        return;
    }

    let mut response = match request.parse_network_response(&network_response) {
        Ok(response) => response,
        Err(error) => {
            core.add_marker("network-parse-failed");
            ctx.delivery.post_error(request, error);
            return;
        }
    };
    core.add_marker("network-parse-complete");

    if core.should_cache() {
        if let Some(entry) = response.cache_entry.take() {
            match ctx.cache.put(core.cache_key(), entry).await {
                Ok(()) => core.add_marker("network-cache-written"),
                Err(e) => warn!(
                    cache_key = %core.cache_key(),
                    error = %e,
                    "failed to write cache entry"
                ),
            }
        }
    }

    ctx.delivery.post_response(request, response, None);
}
