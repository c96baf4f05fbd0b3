use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use syncflow::transport::{Transport, TransportResponse, fetch_all};
use syncflow::{
    BoundedExecutor, CancellationToken, ErrorKind, RateLimiter, TaskGroup, TaskResult,
};
use tokio::time::sleep;

use crate::common::init_test_tracing;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_executor_completes_all_tasks_within_limit_test() {
    init_test_tracing();

    let executor = BoundedExecutor::new(3).unwrap();
    let token = CancellationToken::new();
    let completed = Arc::new(AtomicU32::new(0));

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let completed = completed.clone();
            move |_token: CancellationToken| async move {
                sleep(Duration::from_millis(5)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .collect();

    executor.run_all(&token, tasks).await.unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 12);
    assert!(executor.running().max_observed() <= 3);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_fanout_admits_every_task_test() {
    init_test_tracing();

    let limiter = Arc::new(RateLimiter::new(10.0, 1).unwrap());
    let root = CancellationToken::new();
    let mut group = TaskGroup::new(&root);
    let admitted = Arc::new(AtomicU32::new(0));

    for _ in 0..6 {
        let limiter = limiter.clone();
        let admitted = admitted.clone();
        group.spawn(move |token| async move {
            limiter.acquire(&token).await?;
            admitted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    group.wait().await.unwrap();
    assert_eq!(admitted.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn deadline_cancels_a_hung_group_member_test() {
    init_test_tracing();

    let deadline = CancellationToken::with_deadline(Duration::from_secs(1));
    let mut group = TaskGroup::new(&deadline);

    group.spawn(|token| async move {
        token.cancelled().await;
        token.check()
    });

    let err = group.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
}

/// Transport answering after a per-target delay.
struct SlowTransport;

#[async_trait]
impl Transport for SlowTransport {
    async fn send(
        &self,
        target: &str,
        token: &CancellationToken,
    ) -> TaskResult<TransportResponse> {
        let delay = Duration::from_millis(target.len() as u64 * 100);
        token.run_until_cancelled(sleep(delay)).await?;

        Ok(TransportResponse {
            status: 200,
            body: Bytes::from_static(b"ok"),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn parallel_fetch_returns_statuses_in_input_order_test() {
    init_test_tracing();

    let statuses = fetch_all(
        Arc::new(SlowTransport),
        vec!["zz".to_string(), "longest-target".to_string(), "a".to_string()],
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(statuses, vec![200, 200, 200]);
}
