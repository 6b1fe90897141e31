//! Blocking priority queue built on a `BinaryHeap` guarded by a mutex, with a
//! `Notify` to park consumers while the heap is empty.
use crate::priority::{Prioritized, Priority};
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::Notify;

struct Slot<T> {
    priority: Priority,
    sequence: u64,
    // tie-break for items sharing a sequence number (e.g. never assigned)
    order: u64,
    item: T,
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    // BinaryHeap is a max-heap: higher priority wins, then the lower sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.order.cmp(&self.order))
    }
}

struct Heap<T> {
    slots: BinaryHeap<Slot<T>>,
    pushed: u64,
}

pub struct PriorityBlockingQueue<T> {
    heap: Mutex<Heap<T>>,
    available: Notify,
}

impl<T> PriorityBlockingQueue<T>
where
    T: Prioritized,
{
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(Heap {
                slots: BinaryHeap::new(),
                pushed: 0,
            }),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Heap<T>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        {
            let mut heap = self.lock();
            let order = heap.pushed;
            heap.pushed += 1;
            heap.slots.push(Slot {
                priority: item.priority(),
                sequence: item.sequence(),
                order,
                item,
            });
        }
        self.available.notify_one();
    }

    pub fn push_all(&self, items: impl IntoIterator<Item = T>) {
        let mut added = 0usize;
        {
            let mut heap = self.lock();
            for item in items {
                let order = heap.pushed;
                heap.pushed += 1;
                heap.slots.push(Slot {
                    priority: item.priority(),
                    sequence: item.sequence(),
                    order,
                    item,
                });
                added += 1;
            }
        }
        for _ in 0..added {
            self.available.notify_one();
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        let mut heap = self.lock();
        let slot = heap.slots.pop()?;
        if !heap.slots.is_empty() {
            // pass the wake-up on so a second parked consumer picks up the rest
            self.available.notify_one();
        }
        Some(slot.item)
    }

    /// Waits until an item is available. Cancel safe: dropping the future
    /// before it resolves never loses an item.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    /// Removes every queued item, highest priority first.
    pub fn drain(&self) -> Vec<T> {
        let mut heap = self.lock();
        let mut items = Vec::with_capacity(heap.slots.len());
        while let Some(slot) = heap.slots.pop() {
            items.push(slot.item);
        }
        items
    }
}

impl<T> Default for PriorityBlockingQueue<T>
where
    T: Prioritized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PriorityBlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("PriorityBlockingQueue")
            .field("len", &heap.slots.len())
            .field("pushed", &heap.pushed)
            .finish()
    }
}
