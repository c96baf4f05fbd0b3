use std::collections::BTreeSet;

use syncflow::config::PipelineConfig;
use syncflow::pipeline::{buffered, collect_sorted, generate, generate_indexed};
use syncflow::{CancellationToken, ErrorKind, PipelineStage, TaskGroup, task_error};

use crate::common::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn doubling_pipeline_end_to_end_test() {
    init_test_tracing();

    let root = CancellationToken::new();
    let mut group = TaskGroup::new(&root);
    let stage = PipelineStage::new(3, 2).unwrap();

    let numbers = generate(&mut group, vec![1, 2, 3, 4, 5], 2);
    let doubled = stage.run(&mut group, numbers, |n: i64| async move { Ok(n * 2) });
    let mut output = buffered(&mut group, doubled, 8);

    let mut values = Vec::new();
    while let Some(value) = output.recv().await {
        values.push(value);
    }
    group.wait().await.unwrap();

    // Fan-in merges in first-ready order, so only the multiset is stable.
    assert_eq!(values.iter().sum::<i64>(), 30);
    let observed: BTreeSet<i64> = values.into_iter().collect();
    assert_eq!(observed, BTreeSet::from([2, 4, 6, 8, 10]));
}

#[tokio::test(flavor = "multi_thread")]
async fn two_stage_indexed_pipeline_restores_order_test() {
    init_test_tracing();

    let root = CancellationToken::new();
    let mut group = TaskGroup::new(&root);

    let config: PipelineConfig = serde_json::from_str(r#"{"workers": 4, "buffer": 2}"#).unwrap();
    config.validate().unwrap();
    let stage = PipelineStage::new(config.workers, config.buffer).unwrap();

    let input = generate_indexed(&mut group, 1..=20i64, config.buffer);
    let incremented = stage.run_indexed(&mut group, input, |n: i64| async move { Ok(n + 1) });
    let scaled = stage.run_indexed(&mut group, incremented, |n: i64| async move { Ok(n * 10) });

    let sorted = collect_sorted(scaled).await;
    group.wait().await.unwrap();

    let expected: Vec<i64> = (1..=20).map(|n| (n + 1) * 10).collect();
    assert_eq!(sorted, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn transform_failure_stops_an_endless_pipeline_test() {
    init_test_tracing();

    let root = CancellationToken::new();
    let mut group = TaskGroup::new(&root);
    let stage = PipelineStage::new(2, 1).unwrap();

    // Endless input: only the failure-driven cancellation can stop it.
    let input = generate(&mut group, 0i64.., 1);
    let mut output = stage.run(&mut group, input, |n: i64| async move {
        if n >= 10 {
            Err(task_error!(ErrorKind::TaskFailed, "item rejected"))
        } else {
            Ok(n)
        }
    });

    while output.recv().await.is_some() {}

    let err = group.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TaskFailed);
}
