//! Dispatcher tasks: one cache dispatcher and a pool of network dispatchers,
//! each a plain async loop over a priority queue.
mod cache;
mod network;

pub(crate) use cache::spawn_cache_dispatcher;
pub(crate) use network::spawn_network_dispatcher;

use crate::{
    DispatchStats, delivery::ResponseDelivery, network::Network,
    request_queue::QueueShared,
};
use rally_cache::Cache;
use std::{
    any::Any,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{sync::Notify, task::JoinHandle};

/// Collaborators shared by all dispatchers of a queue.
#[derive(Clone)]
pub(crate) struct DispatcherContext {
    pub queues: Arc<QueueShared>,
    pub cache: Arc<dyn Cache>,
    pub network: Arc<dyn Network>,
    pub delivery: Arc<dyn ResponseDelivery>,
    pub stats: Arc<DispatchStats>,
}

/// Shutdown flag plus the interrupt that wakes a dispatcher parked on an
/// empty queue. A wake-up with the flag unset is spurious.
#[derive(Debug, Default)]
pub(crate) struct QuitSignal {
    quit: AtomicBool,
    interrupt: Notify,
}

impl QuitSignal {
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
        self.interrupt.notify_one();
    }

    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Wakes the dispatcher without asking it to stop.
    #[cfg(test)]
    pub fn interrupt(&self) {
        self.interrupt.notify_one();
    }

    pub async fn interrupted(&self) {
        self.interrupt.notified().await;
    }
}

pub(crate) struct DispatcherHandle {
    name: String,
    signal: Arc<QuitSignal>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn spawn<F, Fut>(name: String, run: F) -> Self
    where
        F: FnOnce(Arc<QuitSignal>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let signal = Arc::new(QuitSignal::default());
        let task = tokio::spawn(run(Arc::clone(&signal)));
        Self { name, signal, task }
    }

    /// Asks the dispatcher to stop after its current request.
    pub fn quit(&self) {
        self.signal.quit();
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(
                dispatcher = %self.name,
                error = %e,
                "dispatcher task failed"
            );
        }
    }
}

impl fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("name", &self.name)
            .field("quit", &self.signal.is_quit())
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
