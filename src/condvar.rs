//! Sleep-until-signalled primitive for idle workers and blocked waiters.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// A condition variable paired with its own mutex.
///
/// Carries no predicate: callers re-check their own state after every wake,
/// so spurious wakeups and missed signals only cost latency.
#[derive(Debug, Default)]
pub struct CondWait {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl CondWait {
    pub fn new() -> Self {
        CondWait {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until woken.
    pub fn wait(&self) {
        let mut guard = self.mutex.lock();
        self.condvar.wait(&mut guard);
    }

    /// Blocks until woken or until `timeout` elapses. Returns `true` on timeout.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut guard = self.mutex.lock();
        self.condvar.wait_for(&mut guard, timeout).timed_out()
    }

    /// Wakes every sleeping thread and returns how many were woken.
    pub fn wake_all(&self) -> usize {
        self.condvar.notify_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_for_times_out() {
        let cond = CondWait::new();
        let start = Instant::now();
        assert!(cond.wait_for(Duration::from_millis(5)));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_wake_all_releases_waiter() {
        let cond = Arc::new(CondWait::new());
        let sleeper = {
            let cond = cond.clone();
            thread::spawn(move || cond.wait())
        };

        // Keep signalling until the sleeper has actually parked and been woken.
        while !sleeper.is_finished() {
            cond.wake_all();
            thread::sleep(Duration::from_millis(1));
        }
        sleeper.join().unwrap();
    }
}
