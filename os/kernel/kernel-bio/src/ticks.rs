//! Logical time for LRU stamps.

use kernel_sync::SpinLock;

/// Where the cache reads the current time when a block becomes unused.
pub trait TickSource: Sync {
    /// Current tick; must never go backwards.
    fn now(&self) -> u64;
}

/// A tick counter under its own lock, advanced by the timer interrupt.
pub struct LogicalClock {
    ticks: SpinLock<u64>,
}

impl LogicalClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: SpinLock::new("time", 0),
        }
    }

    /// Advance by one tick; returns the new value.
    ///
    /// # Panics
    /// If the counter would wrap.
    pub fn tick(&self) -> u64 {
        let mut t = self.ticks.lock();
        let Some(next) = t.checked_add(1) else {
            panic!("clock: tick counter overflow");
        };
        *t = next;
        next
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for LogicalClock {
    fn now(&self) -> u64 {
        *self.ticks.lock()
    }
}

impl<C: TickSource + ?Sized> TickSource for &C {
    fn now(&self) -> u64 {
        (**self).now()
    }
}
