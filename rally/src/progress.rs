//! Body download progress, reported to a per-request listener at a bounded
//! rate.
use crate::request::RequestCore;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum time between two intermediate progress reports.
pub const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(1000);

/// Receives `(current, total)` body byte counts while a response is read.
/// `total` is 0 when the server sent no length. Runs on the network
/// dispatcher task, so it must return quickly.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, current: u64, total: u64);
}

impl<F> ProgressListener for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, current: u64, total: u64) {
        self(current, total)
    }
}

/// Progress of one body read. [`HttpStack`](crate::HttpStack) implementations
/// create one per attempt and feed it every chunk they receive.
///
/// Reports `(0, total)` on start, then at most once per
/// [`PROGRESS_UPDATE_INTERVAL`], and the final count on [`finish`] unless it
/// was just reported. Without a listener on the request every call is a no-op.
///
/// [`finish`]: ProgressReporter::finish
pub struct ProgressReporter<'a> {
    listener: Option<&'a dyn ProgressListener>,
    total: u64,
    current: u64,
    reported: u64,
    last_update: Instant,
}

impl<'a> ProgressReporter<'a> {
    pub fn start(request: &'a RequestCore, total: Option<u64>) -> Self {
        let listener = request.progress_listener();
        let total = total.unwrap_or(0);
        if let Some(listener) = listener {
            listener.on_progress(0, total);
        }
        Self {
            listener,
            total,
            current: 0,
            reported: 0,
            last_update: Instant::now(),
        }
    }

    pub fn advance(&mut self, bytes: usize) {
        self.current += bytes as u64;
        if self.listener.is_none() {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_update) > PROGRESS_UPDATE_INTERVAL {
            self.report();
            self.last_update = now;
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn finish(mut self) {
        if self.current != self.reported {
            self.report();
        }
    }

    fn report(&mut self) {
        if let Some(listener) = self.listener {
            listener.on_progress(self.current, self.total);
            self.reported = self.current;
        }
    }
}
