//! The global facade is process-wide state, so everything runs in one test.

use fiberjob::{Counter, JobDecl, JobSystemError, global};
use std::sync::atomic::{AtomicUsize, Ordering};

static HITS: AtomicUsize = AtomicUsize::new(0);

fn hit(_data: *mut ()) {
    HITS.fetch_add(1, Ordering::SeqCst);
}

/// Waits on a nested batch through the global facade from inside a job.
fn nested(_data: *mut ()) {
    let mut decls: Vec<JobDecl> = (0..4).map(|_| JobDecl::new(hit, std::ptr::null_mut())).collect();
    let counter = Counter::new(0);
    unsafe { global::run(&mut decls, &counter) };
    global::wait(&counter);
}

#[test]
fn test_global_lifecycle() {
    assert!(!global::is_running());
    assert!(global::scheduler().is_none());
    assert!(matches!(global::shutdown(), Err(JobSystemError::NotStarted)));

    global::startup(0x1, 64, 8).expect("startup failed");
    assert!(global::is_running());
    assert!(matches!(
        global::startup(0x1, 64, 8),
        Err(JobSystemError::AlreadyStarted)
    ));

    let mut decls: Vec<JobDecl> = (0..16).map(|_| JobDecl::new(hit, std::ptr::null_mut())).collect();
    let counter = Counter::new(0);
    unsafe { global::run(&mut decls, &counter) };
    global::wait(&counter);
    assert_eq!(HITS.load(Ordering::SeqCst), 16);

    let mut outer = [JobDecl::new(nested, std::ptr::null_mut())];
    let outer_counter = Counter::new(0);
    unsafe { global::run(&mut outer, &outer_counter) };
    global::wait(&outer_counter);
    assert_eq!(HITS.load(Ordering::SeqCst), 20);

    let scheduler = global::scheduler().expect("scheduler while running");
    assert_eq!(scheduler.fiber_pool_available(), scheduler.fiber_pool_capacity());
    drop(scheduler);

    global::shutdown().expect("Shutdown failed");
    assert!(!global::is_running());
}
