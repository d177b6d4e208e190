//! Wait-free pool of integer indices.
//!
//! Hands out identities in `0..capacity` without touching the heap after
//! construction. Free indices form a singly linked list threaded through a
//! preallocated array of tagged links; the list head is swapped with a single
//! CAS on a [`TaggedIndex`].

use crate::tagged::{AtomicTaggedIndex, INVALID_INDEX, TaggedIndex};
use crossbeam::utils::{Backoff, CachePadded};
use std::sync::atomic::{AtomicIsize, Ordering};

/// Largest capacity addressable by a tagged index.
pub const MAX_CAPACITY: usize = INVALID_INDEX as usize;

/// A thread-safe, lock-free pool of integers.
pub struct IntPool {
    free_list: CachePadded<AtomicTaggedIndex>,
    /// `links[i]` is the free index that follows `i` while `i` is free.
    links: Box<[AtomicTaggedIndex]>,
    /// Free-count estimate. Updated after the CAS that moves an index, so a
    /// racing alloc can briefly drive it below zero.
    available: AtomicIsize,
}

impl IntPool {
    /// Creates a pool with every index in `0..capacity` free.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or exceeds [`MAX_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "IntPool capacity must be non-zero");
        assert!(
            capacity <= MAX_CAPACITY,
            "IntPool capacity {capacity} exceeds {MAX_CAPACITY}"
        );

        let links = (0..capacity)
            .map(|i| {
                let next = if i + 1 < capacity {
                    (i + 1) as u32
                } else {
                    INVALID_INDEX
                };
                AtomicTaggedIndex::new(TaggedIndex::new(next, 0))
            })
            .collect();

        IntPool {
            free_list: CachePadded::new(AtomicTaggedIndex::new(TaggedIndex::new(0, 0))),
            links,
            available: AtomicIsize::new(capacity as isize),
        }
    }

    /// Removes one index from the free set.
    ///
    /// Spins until an index is available. Callers size the pool so that this
    /// never waits indefinitely.
    pub fn alloc(&self) -> usize {
        let backoff = Backoff::new();
        loop {
            if let Some(index) = self.try_alloc() {
                return index;
            }
            backoff.snooze();
        }
    }

    /// Removes one index from the free set, or returns `None` if it is empty.
    pub fn try_alloc(&self) -> Option<usize> {
        let backoff = Backoff::new();
        loop {
            let head = self.free_list.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }

            let next = self.links[head.slot()].load(Ordering::Acquire);
            if self
                .free_list
                .compare_exchange(head, head.successor(next.index))
                .is_ok()
            {
                self.available.fetch_sub(1, Ordering::Relaxed);
                return Some(head.slot());
            }
            backoff.spin();
        }
    }

    /// Returns `index` to the free set.
    ///
    /// `index` must have come from [`alloc`](Self::alloc) on this pool and must
    /// not be freed twice.
    pub fn free(&self, index: usize) {
        debug_assert!(index < self.links.len(), "index {index} out of range");

        let link = &self.links[index];
        let backoff = Backoff::new();
        loop {
            let head = self.free_list.load(Ordering::Acquire);
            link.store(TaggedIndex::new(head.index, 0), Ordering::Relaxed);

            if self
                .free_list
                .compare_exchange(head, head.successor(index as u32))
                .is_ok()
            {
                self.available.fetch_add(1, Ordering::Relaxed);
                return;
            }
            backoff.spin();
        }
    }

    /// Total number of indices managed by the pool.
    pub fn capacity(&self) -> usize {
        self.links.len()
    }

    /// Number of free indices. Weakly consistent under concurrent use.
    pub fn available(&self) -> usize {
        let free = self.available.load(Ordering::Relaxed).max(0) as usize;
        free.min(self.capacity())
    }
}
