//! Completion counters shared between a batch of jobs and their waiter.

use std::sync::atomic::{AtomicI32, Ordering};

/// Number of unfinished jobs in a batch.
///
/// `run` stores the batch size, each finishing job decrements it once, and
/// waiters treat any value `<= 0` as complete.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct Counter {
    value: AtomicI32,
}

impl Counter {
    /// Creates a counter with the specified initial value.
    ///
    /// Pre-loading a non-zero value makes a `wait` on the counter block even
    /// before the jobs that will drain it have been submitted.
    pub const fn new(initial: i32) -> Self {
        Counter {
            value: AtomicI32::new(initial),
        }
    }

    /// Returns the current value of the counter.
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    /// Checks if the counter has reached zero.
    pub fn is_complete(&self) -> bool {
        self.value() <= 0
    }

    pub(crate) fn set(&self, value: i32) {
        self.value.store(value, Ordering::Release);
    }

    /// Marks one job finished. Returns true if this was the last one.
    pub(crate) fn decrement(&self) -> bool {
        // Release so the finished job's writes are visible to the waiter.
        self.value.fetch_sub(1, Ordering::AcqRel) == 1
    }
}
