use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam::sync::WaitGroup;
use taskpool::{Pool, PoolConfig, PoolError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), PoolError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskpool=debug")),
        )
        .init();

    let pool = Pool::with_config(
        PoolConfig::new(5)
            .with_expire(Duration::from_millis(500))
            .with_thread_name("demo"),
    )?;

    let start = Instant::now();
    let wg = WaitGroup::new();
    let finished = Arc::new(AtomicUsize::new(0));

    for job in 0..10 {
        let wg = wg.clone();
        let finished = Arc::clone(&finished);
        pool.submit(move || {
            thread::sleep(Duration::from_millis(200));
            finished.fetch_add(1, Ordering::Relaxed);
            drop(wg);

            // Every third job fails; the pool keeps going
            if job % 3 == 0 {
                panic!("job {} failed", job);
            }
        })?;
    }

    wg.wait();

    println!("\n=== Stats ===\n");
    println!("Jobs finished: {}", finished.load(Ordering::Relaxed));
    println!("Total time elapsed: {:?}", start.elapsed());
    println!("Pool right after the batch: {:?}", pool.stats());

    thread::sleep(Duration::from_millis(1200));
    println!("Pool after idle reclamation: {:?}", pool.stats());

    pool.release();
    println!("Submit after release: {:?}", pool.submit(|| {}).unwrap_err());

    Ok(())
}
