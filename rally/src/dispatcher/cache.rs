#![deny(clippy::unwrap_used)]
use super::{DispatcherContext, DispatcherHandle, QuitSignal, panic_message};
use crate::{NetworkResponse, RequestError, request::Dispatch};
use futures::FutureExt as _;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

pub(crate) fn spawn_cache_dispatcher(ctx: DispatcherContext) -> DispatcherHandle {
    let span = info_span!("dispatcher", kind = "cache");
    DispatcherHandle::spawn("cache".to_string(), move |signal| {
        cache_dispatcher(ctx, signal).instrument(span)
    })
}

/// Drains the cache queue: hits are answered locally, misses and expired
/// entries move on to the network queue.
#[instrument(name = "cache_dispatcher", skip_all)]
async fn cache_dispatcher(ctx: DispatcherContext, signal: Arc<QuitSignal>) {
    if let Err(e) = ctx.cache.initialize().await {
        warn!(error = %e, "cache initialization failed");
    }
    info!("cache dispatcher started");

    loop {
        let request = tokio::select! {
            biased;
            _ = signal.interrupted() => {
                if signal.is_quit() {
                    break;
                }
                continue;
            }
            request = ctx.queues.cache_queue.pop() => request,
        };

        let outcome = AssertUnwindSafe(process(&ctx, Arc::clone(&request)))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let message = panic_message(&*panic);
            error!(
                url = %request.core().url(),
                %message,
                "unhandled panic in cache dispatcher"
            );
            ctx.delivery
                .post_error(request, RequestError::Unexpected(message));
        }
    }

    info!("cache dispatcher stopped");
}

async fn process(ctx: &DispatcherContext, request: Arc<dyn Dispatch>) {
    let core = request.core();
    core.add_marker("cache-queue-take");

    if core.is_cancelled() {
        ctx.stats.record_cancelled_discarded();
        core.finish("cache-discard-canceled");
        return;
    }

    let entry = match ctx.cache.get(core.cache_key()).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(
                cache_key = %core.cache_key(),
                error = %e,
                "cache read failed, treating as a miss"
            );
            None
        }
    };

    let Some(entry) = entry else {
        core.add_marker("cache-miss");
        ctx.stats.record_cache_miss();
        ctx.queues.network_queue.push(request);
        return;
    };

    if entry.is_expired() {
        core.add_marker("cache-hit-expired");
        ctx.stats.record_cache_expired();
        core.set_cache_entry(Some(entry));
        ctx.queues.network_queue.push(request);
        return;
    }

    core.add_marker("cache-hit");
    ctx.stats.record_cache_hit();
    let cached = NetworkResponse::from_cache_entry(&entry);
    let mut response = match request.parse_network_response(&cached) {
        Ok(response) => response,
        Err(e) => {
            core.add_marker("cache-parsing-failed");
            debug!(
                cache_key = %core.cache_key(),
                error = %e,
                "cached response unparsable, refetching"
            );
            if let Err(e) = ctx.cache.invalidate(core.cache_key(), true).await {
                warn!(
                    cache_key = %core.cache_key(),
                    error = %e,
                    "failed to invalidate cache entry"
                );
            }
            core.set_cache_entry(None);
            ctx.queues.network_queue.push(request);
            return;
        }
    };
    core.add_marker("cache-hit-parsed");

    if !entry.refresh_needed() {
        ctx.delivery.post_response(request, response, None);
        return;
    }

    // stale: deliver now, revalidate in the background once delivered
    core.add_marker("cache-hit-refresh-needed");
    ctx.stats.record_cache_refresh_needed();
    core.set_cache_entry(Some(entry));
    response.intermediate = true;

    let queues = Arc::clone(&ctx.queues);
    let revalidate = Arc::clone(&request);
    ctx.delivery.post_response(
        request,
        response,
        Some(Box::new(move || queues.network_queue.push(revalidate))),
    );
}
