//! Lamport Logical Clock
//!
//! A vector-free Lamport counter. Every outbound coordination message
//! carries `tick()`, every inbound one is folded in with `observe()`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-node logical clock
#[derive(Debug, Default)]
pub struct LogicalClock {
    value: AtomicU64,
}

impl LogicalClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value without advancing
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Advance before a send and return the value to attach
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a received value: local = max(local, received)
    ///
    /// Returns the value after merging.
    pub fn observe(&self, received: Option<u64>) -> u64 {
        match received {
            Some(r) => {
                let prev = self.value.fetch_max(r, Ordering::SeqCst);
                prev.max(r)
            }
            None => self.current(),
        }
    }
}
