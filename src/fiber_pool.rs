//! Pooled job instances and the fibers they run on.
//!
//! The pool is created once at startup: one [`JobInstance`] per slot, each
//! owning a fiber whose data pointer is the instance itself. Slots are handed
//! out through an [`IntPool`] when a job starts and returned only when the job
//! finishes; a parked job keeps its slot.

use crate::counter::Counter;
use crate::error::FiberError;
use crate::fiber::Fiber;
use crate::int_pool::IntPool;
use crate::job::JobDecl;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A job declaration paired with the fiber executing it.
pub(crate) struct JobInstance {
    decl: AtomicPtr<JobDecl>,
    /// Non-null only while the job is parked on the wait queue.
    waiting: AtomicPtr<Counter>,
    /// Home context of the worker that last resumed this job.
    parent: AtomicPtr<Fiber>,
    pool_index: usize,
    fiber: Fiber,
}

impl JobInstance {
    pub(crate) fn decl(&self) -> *mut JobDecl {
        self.decl.load(Ordering::Acquire)
    }

    pub(crate) fn fiber(&self) -> &Fiber {
        &self.fiber
    }

    pub(crate) fn pool_index(&self) -> usize {
        self.pool_index
    }

    pub(crate) fn as_ptr(&self) -> *mut JobInstance {
        self as *const JobInstance as *mut JobInstance
    }

    /// Called by the worker right before switching into the job.
    pub(crate) fn prepare(&self, parent: &Fiber) {
        self.parent
            .store(parent as *const Fiber as *mut Fiber, Ordering::Release);
        self.waiting.store(ptr::null_mut(), Ordering::Release);
    }

    /// Records the counter a parked job is waiting on.
    pub(crate) fn park_on(&self, counter: &Counter) {
        self.waiting
            .store(counter as *const Counter as *mut Counter, Ordering::Release);
    }

    pub(crate) fn is_parked(&self) -> bool {
        !self.waiting.load(Ordering::Acquire).is_null()
    }

    /// Whether the counter this job waits on has drained.
    pub(crate) fn is_ready(&self) -> bool {
        let waiting = self.waiting.load(Ordering::Acquire);
        // SAFETY: a waiter's counter outlives the wait, and the waiter cannot
        // return from `wait` before we resume it.
        waiting.is_null() || unsafe { (*waiting).is_complete() }
    }

    /// Suspends the running job back into its worker's home context.
    ///
    /// # Safety
    ///
    /// Must be called from this instance's own fiber while it is running.
    pub(crate) unsafe fn return_to_parent(&self) {
        let parent = self.parent.load(Ordering::Acquire);
        debug_assert!(!parent.is_null());
        // SAFETY: the parent is the worker's home fiber, alive for as long as
        // the worker thread that is currently blocked in `switch_to`.
        unsafe { Fiber::switch_to(&*parent) };
    }
}

/// Body of every pooled fiber. Never returns: each pass runs whatever job the
/// instance currently holds, then hands control back to the worker.
fn job_fiber_main(_data: *mut ()) {
    loop {
        // SAFETY: every pooled fiber's data pointer is its own `JobInstance`.
        let job = unsafe { &*Fiber::get_data().cast::<JobInstance>() };
        let decl = job.decl();

        // SAFETY: the submitter keeps the declaration alive until it finishes.
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { (*decl).execute() }));
        if let Err(payload) = result {
            tracing::error!(
                pool_index = job.pool_index,
                "job panicked: {}",
                panic_message(payload.as_ref())
            );
        }

        // SAFETY: we are running on `job.fiber`.
        unsafe { job.return_to_parent() };
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Fixed set of job instances and the pool of their free slot indices.
pub(crate) struct FiberPool {
    instances: Box<[JobInstance]>,
    free: IntPool,
}

impl FiberPool {
    /// Creates `count` instances, each with a fiber of `stack_size` bytes.
    pub(crate) fn new(count: usize, stack_size: usize) -> Result<Self, FiberError> {
        let mut instances: Vec<JobInstance> = Vec::with_capacity(count);
        let base = instances.as_mut_ptr();

        for pool_index in 0..count {
            // SAFETY: `with_capacity` reserved exactly `count` slots, so this
            // is where the instance pushed below will live.
            let home = unsafe { base.add(pool_index) };
            let fiber = Fiber::new(job_fiber_main, home.cast(), stack_size)?;
            instances.push(JobInstance {
                decl: AtomicPtr::new(ptr::null_mut()),
                waiting: AtomicPtr::new(ptr::null_mut()),
                parent: AtomicPtr::new(ptr::null_mut()),
                pool_index,
                fiber,
            });
        }

        let instances = instances.into_boxed_slice();
        debug_assert!(ptr::eq(instances.as_ptr(), base));

        Ok(FiberPool {
            instances,
            free: IntPool::new(count),
        })
    }

    /// Takes a free slot for `decl`, or returns `None` if every slot is held
    /// by a running or parked job.
    pub(crate) fn try_acquire(&self, decl: *mut JobDecl) -> Option<&JobInstance> {
        let instance = &self.instances[self.free.try_alloc()?];
        instance.decl.store(decl, Ordering::Release);
        Some(instance)
    }

    /// Returns a finished job's slot.
    pub(crate) fn release(&self, instance: &JobInstance) {
        self.free.free(instance.pool_index);
    }

    /// Whether `instance` points into this pool.
    pub(crate) fn owns(&self, instance: *const JobInstance) -> bool {
        self.instances.as_ptr_range().contains(&instance)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.free.capacity()
    }

    pub(crate) fn available(&self) -> usize {
        self.free.available()
    }
}
