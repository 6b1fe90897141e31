use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Priority level of a request. Declaration order is the dequeue order
/// reversed: `Immediate` leaves a queue before `High`, and so on.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Immediate = 3,
}

impl Priority {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Anything above the known range saturates to `Immediate`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Immediate,
        }
    }
}

/// Ordering key read once, when an item is pushed.
pub trait Prioritized {
    fn priority(&self) -> Priority;
    fn sequence(&self) -> u64;
}

impl<T> Prioritized for Arc<T>
where
    T: Prioritized + ?Sized,
{
    fn priority(&self) -> Priority {
        (**self).priority()
    }

    fn sequence(&self) -> u64 {
        (**self).sequence()
    }
}
