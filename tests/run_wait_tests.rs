use fiberjob::{Counter, JobDecl, JobSystem, JobSystemConfig};
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};

fn tally(data: *mut ()) {
    let slot = unsafe { &*data.cast::<AtomicU32>() };
    slot.fetch_add(1, Ordering::SeqCst);
}

fn start(workers: usize, queue_capacity: usize, fiber_pool_size: usize) -> JobSystem {
    let mut config = JobSystemConfig::with_workers(workers);
    config.queue_capacity = queue_capacity;
    config.fiber_pool_size = fiber_pool_size;
    JobSystem::startup(config).expect("startup failed")
}

#[test]
fn test_each_job_runs_exactly_once() {
    let job_system = start(4, 128, 16);
    let slots: Vec<AtomicU32> = (0..500).map(|_| AtomicU32::new(0)).collect();
    let mut decls: Vec<JobDecl> = slots
        .iter()
        .map(|slot| JobDecl::new(tally, (slot as *const AtomicU32 as *mut AtomicU32).cast()))
        .collect();
    let counter = Counter::new(0);

    // More jobs than queue slots: run spins on a full queue while workers drain it.
    unsafe { job_system.run(&mut decls, &counter) };
    job_system.wait(&counter);

    assert_eq!(counter.value(), 0);
    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(slot.load(Ordering::SeqCst), 1, "job {i}");
    }
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_counter_is_reusable_across_batches() {
    let job_system = start(2, 64, 8);
    let hits = AtomicU32::new(0);
    let data = (&hits as *const AtomicU32 as *mut AtomicU32).cast();
    let counter = Counter::new(0);

    for round in 1..=5u32 {
        let mut decls: Vec<JobDecl> = (0..10).map(|_| JobDecl::new(tally, data)).collect();
        unsafe { job_system.run(&mut decls, &counter) };
        job_system.wait(&counter);
        assert_eq!(hits.load(Ordering::SeqCst), round * 10);
    }
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_wait_on_drained_counter_returns_immediately() {
    let job_system = start(1, 16, 4);
    let counter = Counter::new(0);
    job_system.wait(&counter);
    let negative = Counter::new(-1);
    job_system.wait(&negative);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_random_batch_sizes() {
    let job_system = start(3, 32, 8);
    let mut rng = rand::rng();

    for _ in 0..20 {
        let size = rng.random_range(0..200);
        let hits = AtomicU32::new(0);
        let data = (&hits as *const AtomicU32 as *mut AtomicU32).cast();
        let mut decls: Vec<JobDecl> = (0..size).map(|_| JobDecl::new(tally, data)).collect();
        let counter = Counter::new(0);

        unsafe { job_system.run(&mut decls, &counter) };
        job_system.wait(&counter);
        assert_eq!(hits.load(Ordering::SeqCst), size as u32);
    }
    job_system.shutdown().expect("Shutdown failed");
}
