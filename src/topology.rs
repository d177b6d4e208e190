//! Hardware thread discovery and mask decoding.

use core_affinity::CoreId;
use std::thread;

/// Bits in a hardware thread mask.
pub const MAX_HARDWARE_THREADS: usize = u32::BITS as usize;

#[derive(Debug, Clone)]
pub struct Topology {
    /// Logical processors reported by the OS.
    pub hardware_threads: usize,
    core_ids: Vec<CoreId>,
}

impl Topology {
    pub fn detect() -> Self {
        Topology {
            hardware_threads: available_hardware_threads(),
            // Empty when the platform does not expose affinity; pinning is then skipped.
            core_ids: core_affinity::get_core_ids().unwrap_or_default(),
        }
    }

    /// Logical processors that are both set in `mask` and present on this machine.
    pub fn enabled_threads(&self, mask: u32) -> Vec<usize> {
        (0..self.hardware_threads.min(MAX_HARDWARE_THREADS))
            .filter(|&i| mask & (1u32 << i) != 0)
            .collect()
    }

    /// Bits of `mask` naming processors this machine does not have.
    pub fn ignored_bits(&self, mask: u32) -> u32 {
        mask & !mask_for_threads(self.hardware_threads)
    }

    /// Affinity handle for logical processor `hardware_thread`, if pinnable.
    pub fn core_id(&self, hardware_thread: usize) -> Option<CoreId> {
        self.core_ids
            .iter()
            .copied()
            .find(|core| core.id == hardware_thread)
    }
}

pub fn available_hardware_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Mask enabling the first `count` logical processors.
pub fn mask_for_threads(count: usize) -> u32 {
    if count >= MAX_HARDWARE_THREADS {
        u32::MAX
    } else {
        (1u32 << count) - 1
    }
}
