//! Job declarations and closure-backed job batches.
//!
//! A [`JobDecl`] is the raw unit of work: an entry function, an opaque data
//! pointer, and (once submitted) a pointer to the shared pending counter. The
//! scheduler never copies or inspects the data.
//!
//! A [`JobBatch`] owns a set of boxed closures, their declarations and their
//! counter on the heap, and waits for them when dropped, which makes closure
//! submission safe.

use crate::counter::Counter;
use crate::job_system::Scheduler;
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};

/// Job entry point. Receives the declaration's data pointer.
pub type JobEntry = fn(*mut ());

/// Type-erased closure payload of a [`JobBatch`].
pub type BoxedJob = Box<dyn FnOnce() + Send + 'static>;

/// Declaration of one job.
///
/// Immutable once submitted, except that the scheduler decrements the counter
/// it was submitted with exactly once when the job finishes.
#[derive(Debug)]
pub struct JobDecl {
    entry: JobEntry,
    data: *mut (),
    pending_count: *const Counter,
}

// SAFETY: the data pointer is opaque to the scheduler; whoever submits the job
// vouches that `entry(data)` may run on any worker thread.
unsafe impl Send for JobDecl {}
unsafe impl Sync for JobDecl {}

impl JobDecl {
    pub const fn new(entry: JobEntry, data: *mut ()) -> Self {
        JobDecl {
            entry,
            data,
            pending_count: ptr::null(),
        }
    }

    pub fn entry(&self) -> JobEntry {
        self.entry
    }

    pub fn data(&self) -> *mut () {
        self.data
    }

    /// Counter this job decrements on completion; null until submitted.
    pub fn pending_count(&self) -> *const Counter {
        self.pending_count
    }

    pub(crate) fn bind(&mut self, counter: &Counter) {
        self.pending_count = counter;
    }

    /// Runs the entry function.
    ///
    /// # Safety
    ///
    /// `data` must still be valid for `entry`.
    pub(crate) unsafe fn execute(&self) {
        (self.entry)(self.data);
    }

    /// Decrements the pending counter of a finished job. Returns true if the
    /// counter drained.
    ///
    /// Takes a raw pointer because the submitter may free the declaration as
    /// soon as the counter reaches zero.
    ///
    /// # Safety
    ///
    /// `decl` and its counter must be alive, and this must be called once per
    /// job run.
    pub(crate) unsafe fn finish(decl: *const JobDecl) -> bool {
        let pending = unsafe { (*decl).pending_count };
        debug_assert!(!pending.is_null(), "finishing a job that was never submitted");
        unsafe { (*pending).decrement() }
    }
}

struct BatchState {
    counter: Counter,
    decls: Vec<JobDecl>,
    work: Box<[UnsafeCell<Option<BoxedJob>>]>,
}

fn run_boxed(data: *mut ()) {
    // SAFETY: `data` is one work slot of a live `BatchState`, and each slot is
    // referenced by exactly one declaration.
    let slot = unsafe { &mut *data.cast::<Option<BoxedJob>>() };
    if let Some(work) = slot.take() {
        work();
    }
}

/// A submitted group of closures sharing one counter.
///
/// Dropping the batch waits for every closure to finish.
#[must_use = "dropping a JobBatch immediately waits for it"]
pub struct JobBatch {
    scheduler: Scheduler,
    state: NonNull<BatchState>,
}

// SAFETY: the batch only reads its counter; the rest of the state is touched
// by workers through raw pointers until the counter drains.
unsafe impl Send for JobBatch {}

impl JobBatch {
    pub(crate) fn submit<I>(scheduler: &Scheduler, jobs: I) -> Self
    where
        I: IntoIterator<Item = BoxedJob>,
    {
        let work = jobs
            .into_iter()
            .map(|job| UnsafeCell::new(Some(job)))
            .collect();
        let state = Box::into_raw(Box::new(BatchState {
            counter: Counter::new(0),
            decls: Vec::new(),
            work,
        }));

        // SAFETY: `state` stays allocated until `Drop`, which first waits for
        // the counter to drain.
        unsafe {
            (*state).decls = (*state)
                .work
                .iter()
                .map(|slot| JobDecl::new(run_boxed, slot.get().cast()))
                .collect();
            scheduler.run(&mut (*state).decls, &(*state).counter);
        }

        JobBatch {
            scheduler: scheduler.clone(),
            // SAFETY: `Box::into_raw` never returns null.
            state: unsafe { NonNull::new_unchecked(state) },
        }
    }

    pub fn counter(&self) -> &Counter {
        // SAFETY: see `submit`; only the counter is borrowed.
        unsafe { &(*self.state.as_ptr()).counter }
    }

    pub fn is_complete(&self) -> bool {
        self.counter().is_complete()
    }

    /// Blocks (or parks the calling job) until every closure has run.
    pub fn wait(self) {
        drop(self);
    }
}

impl Drop for JobBatch {
    fn drop(&mut self) {
        self.scheduler.wait(self.counter());
        // SAFETY: the counter drained, so no worker references the state.
        drop(unsafe { Box::from_raw(self.state.as_ptr()) });
    }
}

impl std::fmt::Debug for JobBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobBatch")
            .field("pending", &self.counter().value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bump(data: *mut ()) {
        let hits = unsafe { &*data.cast::<AtomicUsize>() };
        hits.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_decl_execute_and_finish() {
        let hits = AtomicUsize::new(0);
        let counter = Counter::new(1);
        let mut decl = JobDecl::new(bump, &hits as *const AtomicUsize as *mut ());
        assert!(decl.pending_count().is_null());

        decl.bind(&counter);
        unsafe { decl.execute() };
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(unsafe { JobDecl::finish(&decl) });
        assert!(counter.is_complete());
    }

    #[test]
    fn test_run_boxed_runs_once() {
        let hits = std::sync::Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let mut slot: Option<BoxedJob> = Some(Box::new(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let data = (&mut slot as *mut Option<BoxedJob>).cast();

        run_boxed(data);
        run_boxed(data);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(slot.is_none());
    }
}
