//! Error types for job system lifecycle operations.
//!
//! Only startup and shutdown can fail. Submitting and waiting have no error
//! path: exhaustion spins and misuse is a caller bug.

use std::io;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("queue_capacity must be greater than 0")]
    ZeroQueueCapacity,
    #[error("fiber_pool_size must be greater than 0")]
    ZeroFiberPool,
    #[error("fiber_stack_size must be greater than 0")]
    ZeroStackSize,
    #[error("{field} of {value} exceeds the tagged index limit of {max}")]
    CapacityTooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },
    #[error("hardware thread mask {mask:#x} enables none of the {available} available hardware threads")]
    NoWorkers { mask: u32, available: usize },
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures creating an execution context.
#[derive(Debug, Error)]
pub enum FiberError {
    #[error("failed to allocate a {size}-byte fiber stack")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },
}

/// Errors produced by job system startup and shutdown.
#[derive(Debug, Error)]
pub enum JobSystemError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fiber(#[from] FiberError),
    #[error("failed to spawn worker thread {id}")]
    SpawnWorker {
        id: usize,
        #[source]
        source: io::Error,
    },
    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),
    #[error("job system already started")]
    AlreadyStarted,
    #[error("job system not started")]
    NotStarted,
}
