//! Priority ordered queues shared between the request queue facade and its
//! dispatchers.
//!
//! Items leave a [`PriorityBlockingQueue`] by priority first (highest first) and
//! by sequence number second (lowest first), so equal priorities keep insertion
//! order. `pop` suspends the calling task while the queue is empty.
pub mod priority;
pub mod queue;

pub use crate::priority::{Prioritized, Priority};
pub use crate::queue::PriorityBlockingQueue;
