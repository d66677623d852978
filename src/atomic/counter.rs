use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Lock-free unsigned counter.
///
/// Every operation is a single atomic instruction. Nothing orders operations
/// issued by different callers beyond their own atomicity, callers needing a
/// sequence must synchronize themselves.
///
/// Decrementing a counter at zero wraps around to `u64::MAX`, the same as any
/// other unsigned underflow on the counter.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increments and returns the new value.
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Decrements and returns the new value.
    pub fn dec(&self) -> u64 {
        self.0.fetch_sub(1, Ordering::SeqCst).wrapping_sub(1)
    }

    /// Adds `delta` and returns the new value.
    pub fn add(&self, delta: u64) -> u64 {
        self.0.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta)
    }

    /// Stores `new` only if the counter currently holds `old`.
    pub fn compare_and_swap(&self, old: u64, new: u64) -> bool {
        self.0
            .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl fmt::Display for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current())
    }
}
