//! Process-wide job system.
//!
//! A single [`JobSystem`] behind free functions, for code that cannot thread a
//! handle through. The registry lock only guards startup, shutdown, and handle
//! lookup; it is never held while submitting or waiting.

use crate::config::JobSystemConfig;
use crate::counter::Counter;
use crate::error::JobSystemError;
use crate::job::JobDecl;
use crate::job_system::{JobSystem, Scheduler};
use parking_lot::RwLock;

static SYSTEM: RwLock<Option<JobSystem>> = parking_lot::const_rwlock(None);

/// Starts the global job system from the `(mask, queue size, fiber count)` triple.
pub fn startup(
    hardware_thread_mask: u32,
    queue_capacity: usize,
    fiber_pool_size: usize,
) -> Result<(), JobSystemError> {
    startup_with_config(JobSystemConfig::new(
        hardware_thread_mask,
        queue_capacity,
        fiber_pool_size,
    ))
}

pub fn startup_with_config(config: JobSystemConfig) -> Result<(), JobSystemError> {
    let mut system = SYSTEM.write();
    if system.is_some() {
        return Err(JobSystemError::AlreadyStarted);
    }
    *system = Some(JobSystem::startup(config)?);
    Ok(())
}

/// Stops the global job system and joins its workers.
pub fn shutdown() -> Result<(), JobSystemError> {
    let system = SYSTEM.write().take().ok_or(JobSystemError::NotStarted)?;
    system.shutdown()
}

pub fn is_running() -> bool {
    SYSTEM.read().is_some()
}

/// A handle to the global scheduler, if started.
pub fn scheduler() -> Option<Scheduler> {
    SYSTEM.read().as_ref().map(|system| system.scheduler().clone())
}

fn running_scheduler() -> Scheduler {
    match scheduler() {
        Some(scheduler) => scheduler,
        None => panic!("global job system used before startup"),
    }
}

/// Submits `decls` to the global job system. See [`Scheduler::run`].
///
/// # Safety
///
/// Same contract as [`Scheduler::run`].
///
/// # Panics
///
/// Panics if the global job system is not running.
pub unsafe fn run(decls: &mut [JobDecl], counter: &Counter) {
    let scheduler = running_scheduler();
    // SAFETY: forwarded to the caller.
    unsafe { scheduler.run(decls, counter) };
}

/// Waits on the global job system. See [`Scheduler::wait`].
///
/// # Panics
///
/// Panics if the global job system is not running.
pub fn wait(counter: &Counter) {
    running_scheduler().wait(counter);
}
