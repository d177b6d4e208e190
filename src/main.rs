use fiberjob::{BoxedJob, Counter, JobDecl, JobSystem, JobSystemConfig, Scheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// One slice of the parallel sum, written back by its job.
struct Chunk<'a> {
    values: &'a [u64],
    sum: u64,
}

fn sum_chunk(data: *mut ()) {
    let chunk = unsafe { &mut *data.cast::<Chunk>() };
    chunk.sum = chunk.values.iter().sum();
}

/// Each link waits on the next one before recording itself, so links finish
/// from the deepest up.
fn chain(scheduler: &Scheduler, depth: usize, order: &Arc<std::sync::Mutex<Vec<usize>>>) {
    if depth == 0 {
        return;
    }
    let next_scheduler = scheduler.clone();
    let next_order = order.clone();
    scheduler
        .submit(move || chain(&next_scheduler, depth - 1, &next_order))
        .wait();
    if let Ok(mut order) = order.lock() {
        order.push(depth);
    }
}

fn main() {
    init_tracing();
    println!("fiberjob - Fiber-Based Job Scheduler\n");

    let job_system = match JobSystem::startup(JobSystemConfig::default()) {
        Ok(job_system) => job_system,
        Err(e) => {
            eprintln!("Startup error: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "Initialized job system with {} worker threads and {} fibers\n",
        job_system.num_workers(),
        job_system.fiber_pool_capacity()
    );

    // Example 1: Raw declarations sharing one counter
    println!("Example 1: Parallel sum over raw job declarations");
    let values: Vec<u64> = (1..=1_000_000).collect();
    let mut chunks: Vec<Chunk> = values
        .chunks(10_000)
        .map(|values| Chunk { values, sum: 0 })
        .collect();
    let mut decls: Vec<JobDecl> = chunks
        .iter_mut()
        .map(|chunk| JobDecl::new(sum_chunk, (chunk as *mut Chunk).cast()))
        .collect();
    let counter = Counter::new(0);

    let start = Instant::now();
    // SAFETY: decls, chunks and counter all outlive the wait below.
    unsafe { job_system.run(&mut decls, &counter) };
    job_system.wait(&counter);
    drop(decls);

    let total: u64 = chunks.iter().map(|chunk| chunk.sum).sum();
    println!("  Summed {} chunks in {:?}", chunks.len(), start.elapsed());
    println!("  Sum result: {} (expected: {})\n", total, 1_000_000u64 * 1_000_001 / 2);

    // Example 2: Closure batch
    println!("Example 2: Closure batch");
    let sum = Arc::new(AtomicUsize::new(0));
    let num_jobs = 100;
    let jobs: Vec<BoxedJob> = (0..num_jobs)
        .map(|i| {
            let sum = sum.clone();
            Box::new(move || {
                sum.fetch_add(i, Ordering::SeqCst);
            }) as BoxedJob
        })
        .collect();
    job_system.submit_batch(jobs).wait();
    let expected_sum: usize = (0..num_jobs).sum();
    println!(
        "  Sum result: {} (expected: {})\n",
        sum.load(Ordering::SeqCst),
        expected_sum
    );

    // Example 3: Nested dependency chain
    println!("Example 3: Nested dependency chain");
    let depth = 8;
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let scheduler = job_system.scheduler().clone();
    let chain_order = order.clone();
    job_system
        .submit(move || chain(&scheduler, depth, &chain_order))
        .wait();
    if let Ok(order) = order.lock() {
        println!("  Completion order: {:?}\n", *order);
    }

    // Example 4: High-throughput test
    println!("Example 4: High-throughput benchmark");
    let num_jobs = 10_000;
    let ran = Arc::new(AtomicU64::new(0));
    let jobs: Vec<BoxedJob> = (0..num_jobs)
        .map(|_| {
            let ran = ran.clone();
            Box::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            }) as BoxedJob
        })
        .collect();

    let start = Instant::now();
    job_system.submit_batch(jobs).wait();
    let duration = start.elapsed();
    let jobs_per_second = num_jobs as f64 / duration.as_secs_f64();
    tracing::info!(jobs = num_jobs, ?duration, jobs_per_second, "throughput run finished");
    println!("  Executed {} jobs in {:?}", ran.load(Ordering::Relaxed), duration);
    println!("  Throughput: {:.2} jobs/second\n", jobs_per_second);

    // Shutdown the system
    println!("Shutting down job system...");
    match job_system.shutdown() {
        Ok(_) => println!("Done!"),
        Err(e) => eprintln!("Shutdown error: {}", e),
    }
}
