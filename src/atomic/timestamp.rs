use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use arc_swap::ArcSwapOption;

use crate::error::{Error, Result};

/// Instant reported by an unset register.
pub const ZERO_TIME: SystemTime = UNIX_EPOCH;

/// Attempts made by [`AtomicTimeStamp::set_if_older`] and
/// [`AtomicTimeStamp::set_if_newer`] before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// Lock-free timestamp register.
///
/// Holds an optional instant behind an atomically swappable pointer, so many
/// workers can track the earliest or latest instant they observed without a
/// mutex. The conditional setters use a bounded compare-and-swap loop: losing
/// every one of `max_attempts` races is reported as
/// [`Error::TimestampContention`] and left to the caller.
#[derive(Debug)]
pub struct AtomicTimeStamp {
    inner: ArcSwapOption<SystemTime>,
    max_attempts: usize,
}

impl Default for AtomicTimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicTimeStamp {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            inner: ArcSwapOption::const_empty(),
            max_attempts,
        }
    }

    /// Stored instant, [`ZERO_TIME`] when unset.
    pub fn current(&self) -> SystemTime {
        self.inner.load().as_deref().copied().unwrap_or(ZERO_TIME)
    }

    pub fn set(&self, ts: SystemTime) {
        self.inner.store(Some(Arc::new(ts)));
    }

    pub fn reset(&self) {
        self.set(ZERO_TIME);
    }

    /// Swaps in `ts` when the register is unset, zero, or later than `ts`.
    pub fn set_if_older(&self, ts: SystemTime) -> Result<()> {
        self.swap_when(ts, |current| ts < current)
    }

    /// Swaps in `ts` when the register is unset, zero, or earlier than `ts`.
    pub fn set_if_newer(&self, ts: SystemTime) -> Result<()> {
        self.swap_when(ts, |current| ts > current)
    }

    fn swap_when<P>(&self, ts: SystemTime, replace: P) -> Result<()>
    where
        P: Fn(SystemTime) -> bool,
    {
        let new = Some(Arc::new(ts));
        for _ in 0..self.max_attempts {
            let current = self.inner.load();
            let needs_swap = match current.as_deref() {
                None => true,
                Some(&value) => value == ZERO_TIME || replace(value),
            };
            if !needs_swap {
                return Ok(());
            }

            let previous = self.inner.compare_and_swap(&*current, new.clone());
            if same_pointer(&*current, &*previous) {
                return Ok(());
            }
        }
        Err(Error::TimestampContention(self.max_attempts))
    }
}

fn same_pointer(a: &Option<Arc<SystemTime>>, b: &Option<Arc<SystemTime>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
