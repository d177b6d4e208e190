use crossbeam::channel;
use fiberjob::{BoxedJob, Counter, JobDecl, JobSystem, JobSystemConfig, JobSystemError};
use std::thread;
use std::time::{Duration, Instant};

fn noop(_data: *mut ()) {}

#[test]
fn test_drained_system_shuts_down_promptly() {
    let (tx, rx) = channel::bounded(1);

    thread::spawn(move || {
        let job_system = JobSystem::startup(JobSystemConfig::new(0x1, 64, 8)).expect("startup failed");
        let mut decls: Vec<JobDecl> = (0..1000).map(|_| JobDecl::new(noop, std::ptr::null_mut())).collect();
        let counter = Counter::new(0);

        unsafe { job_system.run(&mut decls, &counter) };
        job_system.wait(&counter);

        // Every fiber slot came back once its job finished.
        assert_eq!(job_system.fiber_pool_available(), job_system.fiber_pool_capacity());
        assert_eq!(job_system.pending_jobs(), 0);
        assert_eq!(job_system.parked_jobs(), 0);

        let start = Instant::now();
        let result = job_system.shutdown();
        let _ = tx.send((result.is_ok(), start.elapsed()));
    });

    let (ok, elapsed) = rx
        .recv_timeout(Duration::from_secs(20))
        .expect("shutdown did not complete");
    assert!(ok, "Shutdown should succeed after jobs complete");
    assert!(elapsed < Duration::from_secs(5), "shutdown took {elapsed:?}");
}

#[test]
fn test_shutdown_wakes_sleeping_workers() {
    let job_system = JobSystem::startup(JobSystemConfig::with_workers(4)).expect("startup failed");
    // Let the workers go idle.
    thread::sleep(Duration::from_millis(20));
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_repeated_startup_and_shutdown() {
    for _ in 0..5 {
        let job_system = JobSystem::new(2).expect("startup failed");
        let jobs: Vec<BoxedJob> = (0..10).map(|_| Box::new(|| {}) as BoxedJob).collect();
        job_system.submit_batch(jobs).wait();
        job_system.shutdown().expect("Shutdown failed");
    }
}

#[test]
fn test_startup_rejects_bad_config() {
    assert!(matches!(
        JobSystem::startup(JobSystemConfig::new(0, 64, 8)),
        Err(JobSystemError::Config(_))
    ));
    assert!(matches!(
        JobSystem::startup(JobSystemConfig::new(0x1, 64, 0)),
        Err(JobSystemError::Config(_))
    ));
}
