//! Tagged indices for ABA-safe compare-and-swap.
//!
//! The lock-free structures in this crate never link nodes with real pointers.
//! Every link is an index into a preallocated array paired with a generation
//! stamp, and both halves live in a single `u64` so one CAS swaps them together.
//! The generation advances on every successful CAS, which makes a stale
//! observer's CAS fail even if the slot it saw has since been recycled.

use std::sync::atomic::{AtomicU64, Ordering};

/// Index value reserved for "no node".
pub(crate) const INVALID_INDEX: u32 = u32::MAX;

/// An `{index, generation}` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TaggedIndex {
    pub index: u32,
    pub generation: u32,
}

impl TaggedIndex {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        TaggedIndex { index, generation }
    }

    pub(crate) const fn null() -> Self {
        TaggedIndex::new(INVALID_INDEX, 0)
    }

    pub(crate) const fn is_null(self) -> bool {
        self.index == INVALID_INDEX
    }

    /// The link that replaces `self` in a CAS: points at `index`, one generation on.
    pub(crate) const fn successor(self, index: u32) -> Self {
        TaggedIndex::new(index, self.generation.wrapping_add(1))
    }

    pub(crate) const fn pack(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub(crate) const fn unpack(word: u64) -> Self {
        TaggedIndex::new(word as u32, (word >> 32) as u32)
    }

    /// Index as a slice offset. Only meaningful when not null.
    pub(crate) const fn slot(self) -> usize {
        self.index as usize
    }
}

/// A [`TaggedIndex`] stored in one atomic machine word.
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct AtomicTaggedIndex(AtomicU64);

impl AtomicTaggedIndex {
    pub(crate) const fn new(value: TaggedIndex) -> Self {
        AtomicTaggedIndex(AtomicU64::new(value.pack()))
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> TaggedIndex {
        TaggedIndex::unpack(self.0.load(order))
    }

    #[inline]
    pub(crate) fn store(&self, value: TaggedIndex, order: Ordering) {
        self.0.store(value.pack(), order);
    }

    /// Strong CAS with acquire-release success ordering.
    ///
    /// On failure returns the value actually observed.
    #[inline]
    pub(crate) fn compare_exchange(
        &self,
        current: TaggedIndex,
        new: TaggedIndex,
    ) -> Result<TaggedIndex, TaggedIndex> {
        self.0
            .compare_exchange(current.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .map(TaggedIndex::unpack)
            .map_err(TaggedIndex::unpack)
    }
}
