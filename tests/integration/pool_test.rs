use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use syncflow::config::PoolConfig;
use syncflow::{CancellationToken, PoolJob, PoolState, WorkerPool};
use tokio::time::sleep;

use crate::common::init_test_tracing;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_drains_jobs_from_concurrent_producers_test() {
    init_test_tracing();

    let config = PoolConfig {
        workers: 3,
        queue_capacity: 8,
    };
    config.validate().unwrap();

    let token = CancellationToken::new();
    let pool = Arc::new(WorkerPool::new(config.workers, config.queue_capacity, &token).unwrap());
    let completed = Arc::new(AtomicU32::new(0));

    let mut producers = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        let completed = completed.clone();
        producers.push(tokio::spawn(async move {
            for _ in 0..5 {
                let completed = completed.clone();
                pool.submit(PoolJob::new(move |_| async move {
                    sleep(Duration::from_millis(2)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .await;
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    // Shutdown raced from several callers must still drain exactly once.
    let mut callers = Vec::new();
    for _ in 0..3 {
        let pool = pool.clone();
        callers.push(tokio::spawn(async move { pool.shutdown().await }));
    }
    for caller in callers {
        caller.await.unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), 20);
    assert_eq!(pool.state(), PoolState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn pool_survives_a_panicking_job_and_keeps_draining_test() {
    init_test_tracing();

    let token = CancellationToken::new();
    let pool = WorkerPool::new(2, 8, &token).unwrap();
    let completed = Arc::new(AtomicU32::new(0));

    pool.submit(PoolJob::new(|_| async { panic!("poisoned job") }))
        .await;
    for _ in 0..5 {
        let completed = completed.clone();
        pool.submit(PoolJob::new(move |_| async move {
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .await;
    }

    pool.shutdown().await;

    assert_eq!(completed.load(Ordering::SeqCst), 5);
    assert_eq!(pool.state(), PoolState::Stopped);
}
