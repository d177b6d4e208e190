//! Lock-free multi-producer/multi-consumer queue.
//!
//! A Michael–Scott queue (<https://www.cs.rochester.edu/~scott/papers/1996_PODC_queues.pdf>)
//! over a fixed array of nodes. Links, head and tail are [`TaggedIndex`] words,
//! and retired nodes go back to an [`IntPool`] instead of the allocator, so the
//! hot path never allocates.
//!
//! The queue always holds one sentinel node. `head` names the sentinel and the
//! first real element is the sentinel's successor.

use crate::int_pool::{IntPool, MAX_CAPACITY};
use crate::tagged::{AtomicTaggedIndex, INVALID_INDEX, TaggedIndex};
use crossbeam::utils::{Backoff, CachePadded};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

struct Node<T> {
    data: AtomicPtr<T>,
    next: AtomicTaggedIndex,
}

/// Thread-safe, lock-free FIFO of raw pointers.
///
/// The queue never dereferences the pointers it carries; ownership of the
/// pointees stays with whoever pushed them.
pub struct LockFreeQueue<T> {
    head: CachePadded<AtomicTaggedIndex>,
    tail: CachePadded<AtomicTaggedIndex>,
    len: CachePadded<AtomicIsize>,
    nodes: Box<[Node<T>]>,
    free_nodes: IntPool,
    _marker: PhantomData<*mut T>,
}

// SAFETY: payloads are opaque pointers that are only moved between threads,
// never dereferenced by the queue.
unsafe impl<T> Send for LockFreeQueue<T> {}
unsafe impl<T> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    /// Creates a queue able to hold `capacity` elements at once.
    ///
    /// `push` spins while the queue is full, so `capacity` bounds the number of
    /// outstanding elements rather than failing pushes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or too large for a tagged index.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LockFreeQueue capacity must be non-zero");
        assert!(
            capacity < MAX_CAPACITY,
            "LockFreeQueue capacity {capacity} exceeds {}",
            MAX_CAPACITY - 1
        );

        let node_count = capacity + 1;
        let nodes = (0..node_count)
            .map(|_| Node {
                data: AtomicPtr::new(ptr::null_mut()),
                next: AtomicTaggedIndex::new(TaggedIndex::null()),
            })
            .collect();

        let queue = LockFreeQueue {
            head: CachePadded::new(AtomicTaggedIndex::new(TaggedIndex::null())),
            tail: CachePadded::new(AtomicTaggedIndex::new(TaggedIndex::null())),
            len: CachePadded::new(AtomicIsize::new(0)),
            nodes,
            free_nodes: IntPool::new(node_count),
            _marker: PhantomData,
        };

        let sentinel = queue.acquire_node(ptr::null_mut());
        queue
            .head
            .store(TaggedIndex::new(sentinel, 0), Ordering::Relaxed);
        queue
            .tail
            .store(TaggedIndex::new(sentinel, 0), Ordering::Release);
        queue
    }

    /// Appends `data` at the tail. Spins while the queue is full.
    pub fn push(&self, data: *mut T) {
        let index = self.acquire_node(data);
        self.link(index);
    }

    /// Appends `data` at the tail, or hands it back if the queue is full.
    pub fn try_push(&self, data: *mut T) -> Result<(), *mut T> {
        let Some(index) = self.free_nodes.try_alloc() else {
            return Err(data);
        };
        self.init_node(index, data);
        self.link(index as u32);
        Ok(())
    }

    /// Links the prepared node `index` after the current last node.
    fn link(&self, index: u32) {
        let backoff = Backoff::new();

        let tail = loop {
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.nodes[tail.slot()].next.load(Ordering::Acquire);

            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }

            if next.is_null() {
                if self.nodes[tail.slot()]
                    .next
                    .compare_exchange(next, next.successor(index))
                    .is_ok()
                {
                    break tail;
                }
            } else {
                // Tail lags behind the real end; help it along.
                let _ = self.tail.compare_exchange(tail, tail.successor(next.index));
            }
            backoff.spin();
        };

        // Failure is fine: some other thread already advanced it.
        let _ = self.tail.compare_exchange(tail, tail.successor(index));
        self.len.fetch_add(1, Ordering::Release);
    }

    /// Removes the element at the head, or returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<*mut T> {
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.nodes[head.slot()].next.load(Ordering::Acquire);

            if head != self.head.load(Ordering::Acquire) {
                continue;
            }

            if head.index == tail.index {
                if next.is_null() {
                    return None;
                }
                let _ = self.tail.compare_exchange(tail, tail.successor(next.index));
            } else if !next.is_null() {
                // Read before the CAS: once head moves, the node may be recycled.
                let data = self.nodes[next.slot()].data.load(Ordering::Acquire);

                if self
                    .head
                    .compare_exchange(head, head.successor(next.index))
                    .is_ok()
                {
                    self.len.fetch_sub(1, Ordering::Release);
                    self.free_nodes.free(head.slot());
                    return Some(data);
                }
            }
            backoff.spin();
        }
    }

    /// Instantaneous element count. Racing observers may see a stale value.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of elements the queue holds before `push` spins.
    pub fn capacity(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Takes a free node and resets it as a new last node carrying `data`.
    fn acquire_node(&self, data: *mut T) -> u32 {
        let index = self.free_nodes.alloc();
        self.init_node(index, data);
        index as u32
    }

    fn init_node(&self, index: usize, data: *mut T) {
        let node = &self.nodes[index];
        node.data.store(data, Ordering::Relaxed);

        // Keep the generation moving so a stale CAS against this node's old
        // incarnation cannot link onto it.
        let previous = node.next.load(Ordering::Relaxed);
        node.next
            .store(previous.successor(INVALID_INDEX), Ordering::Release);
    }
}

impl<T> std::fmt::Debug for LockFreeQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockFreeQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn token(value: usize) -> *mut usize {
        Box::into_raw(Box::new(value))
    }

    fn untoken(ptr: *mut usize) -> usize {
        *unsafe { Box::from_raw(ptr) }
    }

    #[test]
    fn test_empty_pop() {
        let queue: LockFreeQueue<usize> = LockFreeQueue::new(4);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 4);
    }

    #[test]
    fn test_fifo_order() {
        let queue = LockFreeQueue::new(8);
        for i in 0..8 {
            queue.push(token(i));
        }
        assert_eq!(queue.len(), 8);

        let popped: Vec<usize> = std::iter::from_fn(|| queue.pop()).map(untoken).collect();
        assert_eq!(popped, (0..8).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_node_recycling_over_many_cycles() {
        let queue = LockFreeQueue::new(2);
        for i in 0..1_000 {
            queue.push(token(i));
            queue.push(token(i + 1));
            assert_eq!(queue.pop().map(untoken), Some(i));
            assert_eq!(queue.pop().map(untoken), Some(i + 1));
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_try_push_rejects_when_full() {
        let queue = LockFreeQueue::new(2);
        assert!(queue.try_push(token(1)).is_ok());
        assert!(queue.try_push(token(2)).is_ok());

        let rejected = queue.try_push(token(3)).unwrap_err();
        assert_eq!(untoken(rejected), 3);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().map(untoken), Some(1));
        assert!(queue.try_push(token(4)).is_ok());
        let drained: Vec<usize> = std::iter::from_fn(|| queue.pop()).map(untoken).collect();
        assert_eq!(drained, vec![2, 4]);
    }

    #[test]
    fn test_push_spins_until_space() {
        let queue = Arc::new(LockFreeQueue::new(1));
        queue.push(token(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(token(2)))
        };

        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().map(untoken), Some(1));
        producer.join().unwrap();
        assert_eq!(queue.pop().map(untoken), Some(2));
    }

    #[test]
    fn test_concurrent_push_pop() {
        let queue = Arc::new(LockFreeQueue::new(64));
        let per_producer = 5_000;

        let producers: Vec<_> = (0..2)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        queue.push(token(p * per_producer + i));
                    }
                })
            })
            .collect();

        let mut seen = vec![false; 2 * per_producer];
        let mut received = 0;
        while received < seen.len() {
            if let Some(ptr) = queue.pop() {
                let value = untoken(ptr);
                assert!(!seen[value], "value {value} popped twice");
                seen[value] = true;
                received += 1;
            }
        }

        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.pop().is_none());
    }
}
