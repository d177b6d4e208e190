//! High-level job system interface.
//!
//! [`JobSystem`] owns the worker threads and the shared scheduling state: the
//! pending-job queue, the wait queue of parked jobs, and the fiber pool. It
//! exposes `run` (submit declarations against a counter) and `wait` (block or
//! park until a counter drains). [`Scheduler`] is a cheap handle to the same
//! state for use inside jobs.

use crate::condvar::CondWait;
use crate::config::JobSystemConfig;
use crate::counter::Counter;
use crate::error::{FiberError, JobSystemError};
use crate::fiber::Fiber;
use crate::fiber_pool::{FiberPool, JobInstance};
use crate::job::{BoxedJob, JobBatch, JobDecl};
use crate::queue::LockFreeQueue;
use crate::worker::WorkerPool;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, trace, warn};

/// State shared by every worker and every handle.
pub(crate) struct Shared {
    pub(crate) config: JobSystemConfig,
    /// Submitted declarations that have not started yet.
    pub(crate) job_queue: LockFreeQueue<JobDecl>,
    /// Parked instances waiting for a counter to drain.
    pub(crate) wait_queue: LockFreeQueue<JobInstance>,
    pub(crate) fibers: FiberPool,
    pub(crate) work_added: CondWait,
    pub(crate) work_exhausted: CondWait,
    pub(crate) terminate: AtomicBool,
}

impl Shared {
    /// Allocates the queues and the fiber pool. Starts no threads.
    pub(crate) fn new(config: JobSystemConfig) -> Result<Self, FiberError> {
        let fibers = FiberPool::new(config.fiber_pool_size, config.fiber_stack_size)?;
        Ok(Shared {
            job_queue: LockFreeQueue::new(config.queue_capacity),
            wait_queue: LockFreeQueue::new(config.fiber_pool_size),
            fibers,
            work_added: CondWait::new(),
            work_exhausted: CondWait::new(),
            terminate: AtomicBool::new(false),
            config,
        })
    }
}

/// Cloneable handle for submitting and waiting on jobs.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Scheduler { shared }
    }

    /// Submits every declaration in `decls`, all tracked by `counter`.
    ///
    /// Stores `decls.len()` into `counter`, binds each declaration to it and
    /// queues them. Returns immediately.
    ///
    /// # Safety
    ///
    /// `decls`, `counter`, and whatever each declaration's data points to must
    /// stay alive and unmoved until `counter` reaches zero.
    ///
    /// # Panics
    ///
    /// Panics if `decls` holds more than `i32::MAX` declarations.
    pub unsafe fn run(&self, decls: &mut [JobDecl], counter: &Counter) {
        counter.set(batch_count(decls.len()));

        for decl in decls.iter_mut() {
            decl.bind(counter);
            self.shared.job_queue.push(decl);
        }

        self.shared.work_added.wake_all();
    }

    /// Waits for `counter` to reach zero.
    ///
    /// Inside a job of this scheduler, the job parks and its worker thread
    /// moves on to other jobs. Anywhere else the calling thread blocks.
    pub fn wait(&self, counter: &Counter) {
        if counter.is_complete() {
            return;
        }

        if Fiber::is_running_in_fiber() {
            let job = Fiber::get_data().cast::<JobInstance>();
            if self.shared.fibers.owns(job) {
                // SAFETY: `job` is the pooled instance running this code.
                let job = unsafe { &*job };
                trace!(pool_index = job.pool_index(), "parking job");
                job.park_on(counter);
                // The worker publishes us on the wait queue once we are off
                // this stack, and resumes us after `counter` drains.
                unsafe { job.return_to_parent() };
                debug_assert!(counter.is_complete());
                return;
            }
            debug!("wait from a fiber this scheduler does not own; blocking the thread");
        }

        let idle = self.shared.config.idle_wait();
        while !counter.is_complete() {
            self.shared.work_exhausted.wait_for(idle);
        }
    }

    /// Submits one closure. The returned batch waits for it when dropped.
    pub fn submit<F>(&self, work: F) -> JobBatch
    where
        F: FnOnce() + Send + 'static,
    {
        JobBatch::submit(self, std::iter::once(Box::new(work) as BoxedJob))
    }

    /// Submits several closures tracked by one counter.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use fiberjob::{JobSystem, JobSystemConfig};
    ///
    /// let job_system = JobSystem::startup(JobSystemConfig::with_workers(4)).unwrap();
    /// let jobs: Vec<Box<dyn FnOnce() + Send>> = vec![
    ///     Box::new(|| println!("Job 1")),
    ///     Box::new(|| println!("Job 2")),
    /// ];
    /// job_system.submit_batch(jobs).wait();
    /// job_system.shutdown().unwrap();
    /// ```
    pub fn submit_batch<I>(&self, jobs: I) -> JobBatch
    where
        I: IntoIterator<Item = BoxedJob>,
    {
        JobBatch::submit(self, jobs)
    }

    /// Number of pooled fibers, the bound on jobs in flight.
    pub fn fiber_pool_capacity(&self) -> usize {
        self.shared.fibers.capacity()
    }

    /// Fiber slots not held by a running or parked job.
    pub fn fiber_pool_available(&self) -> usize {
        self.shared.fibers.available()
    }

    /// Submitted jobs that have not started.
    pub fn pending_jobs(&self) -> usize {
        self.shared.job_queue.len()
    }

    /// Jobs parked on the wait queue.
    pub fn parked_jobs(&self) -> usize {
        self.shared.wait_queue.len()
    }

    pub fn config(&self) -> &JobSystemConfig {
        &self.shared.config
    }
}

/// Initial counter value for a batch of `len` jobs.
fn batch_count(len: usize) -> i32 {
    match i32::try_from(len) {
        Ok(count) => count,
        Err(_) => panic!("batch of {len} jobs exceeds the counter range of {}", i32::MAX),
    }
}

/// The main job system managing worker threads and job execution.
///
/// Dereferences to its [`Scheduler`]. Shutting down (explicitly or on drop)
/// stops and joins the workers; outstanding jobs must have drained first.
pub struct JobSystem {
    scheduler: Scheduler,
    workers: Option<WorkerPool>,
}

impl JobSystem {
    /// Builds the queues and fiber pool and starts one worker per enabled
    /// hardware thread.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use fiberjob::{JobSystem, JobSystemConfig};
    ///
    /// let job_system = JobSystem::startup(JobSystemConfig::new(0x1, 64, 8)).unwrap();
    /// job_system.submit(|| println!("Hello from a fiber job!")).wait();
    /// job_system.shutdown().unwrap();
    /// ```
    pub fn startup(config: JobSystemConfig) -> Result<Self, JobSystemError> {
        config.validate()?;

        let shared = Arc::new(Shared::new(config)?);

        let workers = WorkerPool::spawn(&shared)?;
        info!(
            workers = workers.size(),
            fibers = shared.config.fiber_pool_size,
            queue_capacity = shared.config.queue_capacity,
            "job system started"
        );

        Ok(JobSystem {
            scheduler: Scheduler::from_shared(shared),
            workers: Some(workers),
        })
    }

    /// Starts a job system with workers on the first `num_threads` processors.
    pub fn new(num_threads: usize) -> Result<Self, JobSystemError> {
        Self::startup(JobSystemConfig::with_workers(num_threads))
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the number of worker threads in the system.
    pub fn num_workers(&self) -> usize {
        self.workers.as_ref().map_or(0, WorkerPool::size)
    }

    /// Stops the workers and waits for their threads to exit.
    ///
    /// Returns Err if any worker thread panicked.
    pub fn shutdown(mut self) -> Result<(), JobSystemError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), JobSystemError> {
        let Some(workers) = self.workers.take() else {
            return Ok(());
        };
        let shared = &self.scheduler.shared;

        let in_flight = shared.fibers.capacity().saturating_sub(shared.fibers.available());
        if in_flight != 0 || !shared.job_queue.is_empty() {
            warn!(
                in_flight,
                pending = shared.job_queue.len(),
                "shutting down with undrained jobs"
            );
        }

        shared.terminate.store(true, Ordering::Release);
        shared.work_added.wake_all();

        let result = workers.join().map_err(JobSystemError::WorkerPanicked);
        info!("job system shut down");
        result
    }
}

impl Deref for JobSystem {
    type Target = Scheduler;

    fn deref(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!(%err, "job system shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_system() -> JobSystem {
        JobSystem::startup(JobSystemConfig::new(0x1, 64, 8)).expect("startup failed")
    }

    fn bump(data: *mut ()) {
        let hits = unsafe { &*data.cast::<AtomicUsize>() };
        hits.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_job_system_creation() {
        let job_system = test_system();
        assert_eq!(job_system.num_workers(), 1);
        assert_eq!(job_system.fiber_pool_capacity(), 8);
        assert_eq!(job_system.fiber_pool_available(), 8);
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_run_raw_decls() {
        let job_system = test_system();
        let hits = AtomicUsize::new(0);
        let data = &hits as *const AtomicUsize as *mut ();
        let mut decls: Vec<JobDecl> = (0..10).map(|_| JobDecl::new(bump, data)).collect();
        let counter = Counter::new(0);

        unsafe { job_system.run(&mut decls, &counter) };
        job_system.wait(&counter);

        assert_eq!(counter.value(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_run_empty_completes_immediately() {
        let job_system = test_system();
        let counter = Counter::new(3);
        unsafe { job_system.run(&mut [], &counter) };
        assert!(counter.is_complete());
        job_system.wait(&counter);
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_submit_closure() {
        let job_system = test_system();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        let batch = job_system.submit(move || {
            hits_clone.store(42, Ordering::SeqCst);
        });
        batch.wait();

        assert_eq!(hits.load(Ordering::SeqCst), 42);
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_drop_without_shutdown_stops_workers() {
        let job_system = test_system();
        job_system.submit(|| {}).wait();
        drop(job_system);
    }

    #[test]
    fn test_batch_count_range() {
        assert_eq!(batch_count(0), 0);
        assert_eq!(batch_count(i32::MAX as usize), i32::MAX);
    }

    #[test]
    #[should_panic(expected = "exceeds the counter range")]
    fn test_batch_count_overflow_panics() {
        batch_count(i32::MAX as usize + 1);
    }

    #[test]
    fn test_shutdown_with_jobs_in_flight() {
        fn linger(_data: *mut ()) {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        let job_system = test_system();
        let mut decls: Vec<JobDecl> = (0..4).map(|_| JobDecl::new(linger, std::ptr::null_mut())).collect();
        let counter = Counter::new(0);
        unsafe { job_system.run(&mut decls, &counter) };

        // The worker finishes the job it is running, leaves the rest queued,
        // and exits; nothing drains `counter` afterwards.
        job_system.shutdown().expect("Shutdown failed");
        assert!(counter.value() >= 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = JobSystem::startup(JobSystemConfig::new(0x1, 0, 8));
        assert!(matches!(result, Err(JobSystemError::Config(_))));
    }
}
