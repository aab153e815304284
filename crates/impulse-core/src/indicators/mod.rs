pub mod ema;
pub mod macd;
pub mod sstoc;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub use ema::EmaAggregate;
pub use macd::{MacdHistogramAggregate, MacdHistogramRecord};
pub use sstoc::{SstocAggregate, SstocRecord};

use crate::error::StateError;

/// Bounded FIFO window for rolling computations (SSTOC windows, EMA bootstrap).
///
/// Pushing into a full window evicts the oldest element. Contents serialize in
/// insertion order (oldest first) together with the capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RingBufState<T>", bound(deserialize = "T: Deserialize<'de>"))]
pub struct RingBuf<T> {
    cap: usize,
    items: VecDeque<T>,
}

#[derive(Deserialize)]
struct RingBufState<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> TryFrom<RingBufState<T>> for RingBuf<T> {
    type Error = StateError;

    fn try_from(s: RingBufState<T>) -> Result<Self, Self::Error> {
        if s.cap == 0 {
            return Err(StateError::ZeroCapacity);
        }
        if s.items.len() > s.cap {
            return Err(StateError::WindowOverflow {
                len: s.items.len(),
                cap: s.cap,
            });
        }
        Ok(Self {
            cap: s.cap,
            items: s.items,
        })
    }
}

impl<T> RingBuf<T> {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            cap,
            items: VecDeque::with_capacity(cap),
        }
    }

    /// Append `val`, returning the evicted element when the window was full.
    pub fn push(&mut self, val: T) -> Option<T> {
        let evicted = if self.items.len() == self.cap {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(val);
        evicted
    }

    pub fn full(&self) -> bool {
        self.items.len() == self.cap
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterate over values in insertion order (oldest first).
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter()
    }
}

impl RingBuf<f64> {
    pub fn mean(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.items.iter().sum::<f64>() / self.items.len() as f64
    }
}

/// `current - previous`, or `None` when there is nothing to compare against.
pub(crate) fn change(current: f64, previous: Option<f64>) -> Option<f64> {
    previous.map(|p| current - p)
}
