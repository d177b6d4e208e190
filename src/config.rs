//! Job system configuration.

use crate::error::ConfigError;
use crate::int_pool::MAX_CAPACITY;
use crate::topology::{self, Topology};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    None,
    /// The worker for mask bit `i` is pinned to logical processor `i`.
    #[default]
    Linear,
}

/// Configuration for the job system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
    /// One worker per set bit, for bits naming an existing logical processor.
    pub hardware_thread_mask: u32,
    /// Capacity of the pending-job queue.
    pub queue_capacity: usize,
    /// Number of pooled fibers, which bounds the jobs in flight at once. Also
    /// sizes the wait queue, since only pooled jobs can park.
    pub fiber_pool_size: usize,
    /// Stack size for each pooled fiber in bytes, rounded up to 64 KiB.
    pub fiber_stack_size: usize,
    pub pinning: PinningStrategy,
    /// How long an idle worker or a blocked waiter sleeps between checks.
    pub idle_wait_ms: u64,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        JobSystemConfig {
            hardware_thread_mask: topology::mask_for_threads(
                topology::available_hardware_threads(),
            ),
            queue_capacity: 1024,
            fiber_pool_size: 128,
            fiber_stack_size: 64 * 1024,
            pinning: PinningStrategy::default(),
            idle_wait_ms: 1,
        }
    }
}

impl JobSystemConfig {
    /// Configuration from the classic `(mask, queue size, fiber count)` triple.
    pub fn new(hardware_thread_mask: u32, queue_capacity: usize, fiber_pool_size: usize) -> Self {
        JobSystemConfig {
            hardware_thread_mask,
            queue_capacity,
            fiber_pool_size,
            ..Default::default()
        }
    }

    /// Default configuration with workers on the first `count` logical processors.
    ///
    /// Bits past the machine's processor count are dropped at startup, so the
    /// system may run fewer than `count` workers. `JobSystem::num_workers`
    /// reports the actual number.
    pub fn with_workers(count: usize) -> Self {
        JobSystemConfig {
            hardware_thread_mask: topology::mask_for_threads(count),
            ..Default::default()
        }
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Validate configuration values against this machine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.queue_capacity >= MAX_CAPACITY {
            return Err(ConfigError::CapacityTooLarge {
                field: "queue_capacity",
                value: self.queue_capacity,
                max: MAX_CAPACITY - 1,
            });
        }
        if self.fiber_pool_size == 0 {
            return Err(ConfigError::ZeroFiberPool);
        }
        if self.fiber_pool_size >= MAX_CAPACITY {
            return Err(ConfigError::CapacityTooLarge {
                field: "fiber_pool_size",
                value: self.fiber_pool_size,
                max: MAX_CAPACITY - 1,
            });
        }
        if self.fiber_stack_size == 0 {
            return Err(ConfigError::ZeroStackSize);
        }

        let topology = Topology::detect();
        if topology.enabled_threads(self.hardware_thread_mask).is_empty() {
            return Err(ConfigError::NoWorkers {
                mask: self.hardware_thread_mask,
                available: topology.hardware_threads,
            });
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: JobSystemConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }
}
