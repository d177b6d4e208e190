//! Worker thread implementation.
//!
//! Each worker converts its OS thread into a home fiber and then repeatedly
//! makes a scheduling attempt: resume a parked job whose counter drained, or
//! start a pending job on a pooled fiber. Jobs run on the worker's thread
//! until they finish or park, so many fibers are multiplexed onto a fixed
//! number of worker threads.

use crate::config::PinningStrategy;
use crate::error::JobSystemError;
use crate::fiber::Fiber;
use crate::fiber_pool::JobInstance;
use crate::job::JobDecl;
use crate::job_system::Shared;
use crate::topology::Topology;
use core_affinity::CoreId;
use crossbeam::utils::Backoff;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// A worker thread bound to one enabled hardware thread.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Starts a worker thread, pinned to `core` when one is given.
    fn spawn(id: usize, core: Option<CoreId>, shared: Arc<Shared>) -> Result<Self, JobSystemError> {
        let handle = thread::Builder::new()
            .name(format!("fiberjob-worker-{id}"))
            .spawn(move || {
                if let Some(core) = core {
                    if core_affinity::set_for_current(core) {
                        debug!(worker = id, core = core.id, "worker pinned");
                    } else {
                        warn!(worker = id, core = core.id, "failed to pin worker");
                    }
                }

                Worker::run_loop(id, &shared);
            })
            .map_err(|source| JobSystemError::SpawnWorker { id, source })?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    /// Main execution loop for the worker thread.
    fn run_loop(id: usize, shared: &Shared) {
        let home = Fiber::convert_current_thread(ptr::null_mut());
        let idle = shared.config.idle_wait();
        debug!(worker = id, "worker started");

        while !shared.terminate.load(Ordering::Acquire) {
            if !schedule(shared, &home) {
                // Nothing runnable: let blocked waiters re-check, then nap.
                shared.work_exhausted.wake_all();
                shared.work_added.wait_for(idle);
            }
        }

        debug!(worker = id, "worker exiting");
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// One scheduling attempt on the calling worker.
///
/// Resumes a parked job whose counter drained if there is one; otherwise
/// starts the next pending job. Returns false when there is nothing to run
/// and nothing parked, which sends the worker to sleep.
pub(crate) fn schedule(shared: &Shared, home: &Fiber) -> bool {
    if resume_ready(shared, home) {
        return true;
    }

    let Some(mut decl) = shared.job_queue.pop() else {
        return !shared.wait_queue.is_empty();
    };

    let backoff = Backoff::new();
    loop {
        if let Some(job) = shared.fibers.try_acquire(decl) {
            run_job(shared, home, job);
            return true;
        }

        // Every fiber is held by a running or parked job. Put the declaration
        // back; if `run` refilled the queue meanwhile, keep it and let parked
        // jobs finish until a fiber or a queue slot frees up.
        match shared.job_queue.try_push(decl) {
            Ok(()) => return !shared.wait_queue.is_empty(),
            Err(rejected) => {
                decl = rejected;
                if shared.terminate.load(Ordering::Acquire) {
                    warn!("dropping a pending job at shutdown; no fiber or queue slot");
                    return false;
                }
                if !resume_ready(shared, home) {
                    backoff.snooze();
                }
            }
        }
    }
}

/// Scans the parked jobs once and resumes the first whose counter drained.
fn resume_ready(shared: &Shared, home: &Fiber) -> bool {
    // Bounded so that jobs requeued below are not revisited in this pass.
    for _ in 0..shared.wait_queue.len() {
        let Some(job) = shared.wait_queue.pop() else {
            break;
        };
        // SAFETY: the wait queue only carries instances of our fiber pool.
        let job = unsafe { &*job };
        if job.is_ready() {
            trace!(pool_index = job.pool_index(), "resuming parked job");
            run_job(shared, home, job);
            return true;
        }
        shared.wait_queue.push(job.as_ptr());
    }
    false
}

/// Switches into `job` and does the bookkeeping once it hands control back.
fn run_job(shared: &Shared, home: &Fiber, job: &JobInstance) {
    job.prepare(home);
    // SAFETY: the job came off a queue or out of the free pool, so no other
    // worker holds it and its fiber is suspended.
    unsafe { Fiber::switch_to(job.fiber()) };

    if job.is_parked() {
        // Published only now that its fiber is fully suspended.
        shared.wait_queue.push(job.as_ptr());
        return;
    }

    let decl: *mut JobDecl = job.decl();
    shared.fibers.release(job);
    // SAFETY: the declaration stays alive until its counter drains, which
    // happens no earlier than this call.
    if unsafe { JobDecl::finish(decl) } {
        shared.work_exhausted.wake_all();
        shared.work_added.wake_all();
    }
}

/// The set of worker threads of one job system.
pub(crate) struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Starts one worker per hardware thread enabled in the configured mask.
    ///
    /// If a thread fails to start, the workers already running are stopped
    /// and joined before the error is returned.
    pub(crate) fn spawn(shared: &Arc<Shared>) -> Result<Self, JobSystemError> {
        let topology = Topology::detect();
        let mask = shared.config.hardware_thread_mask;

        let ignored = topology.ignored_bits(mask);
        if ignored != 0 {
            warn!(
                "hardware thread mask {mask:#x} names processors beyond the {} available; ignoring {ignored:#x}",
                topology.hardware_threads
            );
        }

        let enabled = topology.enabled_threads(mask);
        let mut workers = Vec::with_capacity(enabled.len());

        for (id, hardware_thread) in enabled.into_iter().enumerate() {
            let core = match shared.config.pinning {
                PinningStrategy::None => None,
                PinningStrategy::Linear => {
                    let core = topology.core_id(hardware_thread);
                    if core.is_none() {
                        warn!(worker = id, hardware_thread, "no affinity handle; worker not pinned");
                    }
                    core
                }
            };

            match Worker::spawn(id, core, Arc::clone(shared)) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    shared.terminate.store(true, Ordering::Release);
                    shared.work_added.wake_all();
                    if let Err(panicked) = (WorkerPool { workers }).join() {
                        error!(panicked, "workers panicked while aborting startup");
                    }
                    return Err(err);
                }
            }
        }

        info!(workers = workers.len(), "worker threads started");
        Ok(WorkerPool { workers })
    }

    /// Returns the number of worker threads in the pool.
    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker thread to exit. The caller must have raised the
    /// terminate flag.
    ///
    /// Returns Err with the number of workers that panicked.
    pub(crate) fn join(self) -> Result<(), usize> {
        let mut failed_count = 0;
        for worker in self.workers {
            let worker_id = worker.id();
            if worker.join().is_err() {
                failed_count += 1;
                error!(worker = worker_id, "worker panicked during execution");
            }
        }

        if failed_count > 0 {
            Err(failed_count)
        } else {
            Ok(())
        }
    }
}
