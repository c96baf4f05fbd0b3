use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use syncflow::config::RetryConfig;
use syncflow::shutdown::{SignalSource, run_until_shutdown};
use syncflow::singleflight::SingleFlight;
use syncflow::{
    BoundedExecutor, CancellationToken, ErrorKind, PoolJob, WorkerPool, task_error,
};
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::common::init_test_tracing;

#[tokio::test(start_paused = true)]
async fn configured_retry_recovers_from_transient_failures_test() {
    init_test_tracing();

    let config: RetryConfig =
        serde_json::from_str(r#"{"max_attempts": 5, "base_delay_ms": 100}"#).unwrap();
    let policy = config.into_policy().unwrap();
    let token = CancellationToken::new();

    let value = policy
        .retry(&token, |attempt| async move {
            if attempt < 4 {
                Err(task_error!(ErrorKind::TransportFailed, "flaky upstream"))
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 4);
}

#[tokio::test(start_paused = true)]
async fn deadline_bounds_an_unbounded_retry_loop_test() {
    init_test_tracing();

    let config: RetryConfig =
        serde_json::from_str(r#"{"max_attempts": 100, "base_delay_ms": 1000}"#).unwrap();
    let policy = config.into_policy().unwrap();
    let token = CancellationToken::with_deadline(Duration::from_millis(3500));

    let err = policy
        .retry::<(), _, _>(&token, |_| async {
            Err(task_error!(ErrorKind::TransportFailed, "never succeeds"))
        })
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
}

#[tokio::test(start_paused = true)]
async fn coalesced_load_under_a_bounded_executor_runs_once_test() {
    init_test_tracing();

    let flight = Arc::new(SingleFlight::<&str, String>::new());
    let executions = Arc::new(AtomicU32::new(0));
    let executor = BoundedExecutor::new(4).unwrap();
    let token = CancellationToken::new();

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let flight = flight.clone();
            let executions = executions.clone();
            move |_token: CancellationToken| async move {
                let value = flight
                    .do_call("settings", || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(20)).await;
                        Ok("loaded".to_string())
                    })
                    .await?;
                assert_eq!(value, "loaded");
                Ok(())
            }
        })
        .collect();

    executor.run_all(&token, tasks).await.unwrap();

    // First wave coalesces; later tasks hit the durable cache.
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

/// Test signal source driven by a oneshot channel.
struct TestSignal(Option<oneshot::Receiver<()>>);

#[async_trait]
impl SignalSource for TestSignal {
    async fn recv(&mut self) {
        if let Some(rx) = self.0.take() {
            let _ = rx.await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn signal_driven_shutdown_drains_a_worker_pool_test() {
    init_test_tracing();

    let token = CancellationToken::new();
    let pool = Arc::new(WorkerPool::new(2, 8, &token).unwrap());
    let completed = Arc::new(AtomicU32::new(0));

    for _ in 0..6 {
        let completed = completed.clone();
        pool.submit(PoolJob::new(move |_| async move {
            sleep(Duration::from_millis(5)).await;
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .await;
    }

    let (signal_tx, signal_rx) = oneshot::channel();
    signal_tx.send(()).unwrap();

    let drain_pool = pool.clone();
    run_until_shutdown(&token, TestSignal(Some(signal_rx)), |stop_token| async move {
        stop_token.run_until_cancelled(drain_pool.shutdown()).await?;
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 6);
}
