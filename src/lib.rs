//! # fiberjob - Fiber-Based Job Scheduler
//!
//! A job system that runs small units of work on a fixed pool of stackful
//! fibers, multiplexed onto one worker thread per enabled hardware thread.
//! A job that waits on other jobs parks its fiber instead of blocking its
//! worker, so dependency chains never consume OS threads.
//!
//! ## Architecture
//!
//! - **Lock-free queue**: bounded Michael–Scott queue carrying raw pointers,
//!   used for pending jobs and for parked jobs
//! - **Integer pool**: lock-free free list of slot indices for queue nodes
//!   and pooled fibers
//! - **Fibers**: execution contexts that can be suspended and resumed on any
//!   worker thread
//! - **Counters**: per-batch pending counts that `wait` observes
//! - **Workers**: OS threads that resume ready parked jobs first, then start
//!   pending ones
//!
//! ## Example
//!
//! ```no_run
//! use fiberjob::{Counter, JobDecl, JobSystem, JobSystemConfig};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! fn bump(data: *mut ()) {
//!     let hits = unsafe { &*data.cast::<AtomicUsize>() };
//!     hits.fetch_add(1, Ordering::Relaxed);
//! }
//!
//! let job_system = JobSystem::startup(JobSystemConfig::with_workers(4)).unwrap();
//!
//! let hits = AtomicUsize::new(0);
//! let data = &hits as *const AtomicUsize as *mut ();
//! let mut decls: Vec<JobDecl> = (0..16).map(|_| JobDecl::new(bump, data)).collect();
//! let counter = Counter::new(0);
//!
//! // The declarations, the counter, and `hits` outlive the wait below.
//! unsafe { job_system.run(&mut decls, &counter) };
//! job_system.wait(&counter);
//! assert_eq!(hits.load(Ordering::Relaxed), 16);
//!
//! // Closures are owned by the returned batch instead.
//! job_system.submit(|| println!("Hello from a fiber job!")).wait();
//!
//! job_system.shutdown().unwrap();
//! ```

pub mod condvar;
pub mod config;
pub mod counter;
pub mod error;
pub mod fiber;
mod fiber_pool;
pub mod global;
pub mod int_pool;
pub mod job;
pub mod job_system;
pub mod queue;
mod tagged;
pub mod topology;
mod worker;

pub use condvar::CondWait;
pub use config::{JobSystemConfig, PinningStrategy};
pub use counter::Counter;
pub use error::{ConfigError, FiberError, JobSystemError};
pub use fiber::Fiber;
pub use int_pool::IntPool;
pub use job::{BoxedJob, JobBatch, JobDecl, JobEntry};
pub use job_system::{JobSystem, Scheduler};
pub use queue::LockFreeQueue;
