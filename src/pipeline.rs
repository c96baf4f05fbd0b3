//! Streaming pipelines: generator, fan-out/fan-in, backpressure, heartbeat.
//!
//! A pipeline moves items through bounded hand-off queues. The generator
//! produces a finite sequence, [`PipelineStage`] fans items out to N parallel
//! transform workers and merges their outputs into one channel, and a bounded
//! buffer stage provides pure backpressure: a slow consumer stalls upstream
//! producers once the buffer fills, with no silent drop.
//!
//! All stage tasks run as [`TaskGroup`] members, so one transform failure
//! cancels the group and every blocked send/receive unblocks within one
//! scheduling step. Merge order is first-ready-wins, never input order;
//! callers needing order use the indexed variant and re-sort downstream via
//! [`collect_sorted`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, TaskResult};
use crate::group::TaskGroup;
use crate::token::CancellationToken;

/// Maps the configured buffer size to a tokio channel capacity.
///
/// A buffer of 0 means synchronous hand-off; tokio bounded channels need a
/// capacity of at least 1, which is the closest available rendezvous.
fn channel_capacity(buffer: usize) -> usize {
    buffer.max(1)
}

/// Spawns a producer emitting `items` into a bounded channel, racing every
/// send against the group token. Returns the receiving end.
pub fn generate<T, I>(group: &mut TaskGroup, items: I, buffer: usize) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T> + Send + 'static,
    I::IntoIter: Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity(buffer));

    group.spawn(move |token| async move {
        for item in items {
            tokio::select! {
                sent = tx.send(item) => {
                    if sent.is_err() {
                        // Receiver dropped; nothing left to feed.
                        debug!("generator output closed, stopping");
                        break;
                    }
                }
                cause = token.cancelled() => return Err(cause.into_error()),
            }
        }
        Ok(())
    });

    rx
}

/// Spawns a producer like [`generate`], tagging each item with its original
/// index so order can be reconstructed downstream.
pub fn generate_indexed<T, I>(
    group: &mut TaskGroup,
    items: I,
    buffer: usize,
) -> mpsc::Receiver<(usize, T)>
where
    T: Send + 'static,
    I: IntoIterator<Item = T> + Send + 'static,
    I::IntoIter: Send + 'static,
{
    let indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();
    generate(group, indexed, buffer)
}

/// Fan-out/fan-in stage transforming items through N parallel workers.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    workers: usize,
    buffer: usize,
}

impl PipelineStage {
    /// Creates a stage with `workers` parallel transformers and a bounded
    /// output buffer of `buffer` items (0 = synchronous hand-off).
    pub fn new(workers: usize, buffer: usize) -> TaskResult<Self> {
        if workers == 0 {
            bail!(
                ErrorKind::ConfigError,
                "invalid pipeline stage",
                "workers must be >= 1"
            );
        }

        Ok(Self { workers, buffer })
    }

    /// Runs the stage: items are pulled from `input` by whichever worker is
    /// ready, transformed, and merged into the returned channel. A transform
    /// failure fails the worker's group membership, cancelling the siblings.
    pub fn run<T, U, F, Fut>(
        &self,
        group: &mut TaskGroup,
        input: mpsc::Receiver<T>,
        transform: F,
    ) -> mpsc::Receiver<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = TaskResult<U>> + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel(channel_capacity(self.buffer));
        let input = Arc::new(tokio::sync::Mutex::new(input));

        for worker_id in 0..self.workers {
            let input = input.clone();
            let out_tx = out_tx.clone();
            let transform = transform.clone();

            group.spawn(move |token| async move {
                loop {
                    // The receive lock is held only for the duration of one
                    // recv, and the recv itself races cancellation.
                    let item = {
                        let mut input = input.lock().await;
                        tokio::select! {
                            item = input.recv() => item,
                            cause = token.cancelled() => return Err(cause.into_error()),
                        }
                    };

                    let Some(item) = item else {
                        break;
                    };

                    let value = transform(item).await?;

                    tokio::select! {
                        sent = out_tx.send(value) => {
                            if sent.is_err() {
                                debug!(worker_id, "stage output closed, stopping worker");
                                break;
                            }
                        }
                        cause = token.cancelled() => return Err(cause.into_error()),
                    }
                }

                debug!(worker_id, "pipeline worker finished");
                Ok(())
            });
        }

        // Workers hold the only remaining senders; the merged channel closes
        // when the last worker exits.
        out_rx
    }

    /// Indexed variant of [`PipelineStage::run`]: the original position tags
    /// ride along with the items so callers can re-sort downstream.
    pub fn run_indexed<T, U, F, Fut>(
        &self,
        group: &mut TaskGroup,
        input: mpsc::Receiver<(usize, T)>,
        transform: F,
    ) -> mpsc::Receiver<(usize, U)>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = TaskResult<U>> + Send + 'static,
    {
        self.run(group, input, move |(index, item): (usize, T)| {
            let transformed = transform(item);
            async move { Ok((index, transformed.await?)) }
        })
    }
}

/// Re-queues `input` through a bounded buffer of `buffer` items.
///
/// Pure backpressure stage: once the buffer fills, the upstream producer
/// stalls on its next send until the consumer catches up.
pub fn buffered<T>(
    group: &mut TaskGroup,
    mut input: mpsc::Receiver<T>,
    buffer: usize,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity(buffer));

    group.spawn(move |token| async move {
        loop {
            let item = tokio::select! {
                item = input.recv() => item,
                cause = token.cancelled() => return Err(cause.into_error()),
            };

            let Some(item) = item else {
                break;
            };

            tokio::select! {
                sent = tx.send(item) => {
                    if sent.is_err() {
                        break;
                    }
                }
                cause = token.cancelled() => return Err(cause.into_error()),
            }
        }
        Ok(())
    });

    rx
}

/// Emits a periodic tick on its own schedule, independent of payload flow,
/// purely as a liveness signal. The emitter stops cleanly once `token`
/// cancels or the receiver is dropped; missed ticks are skipped rather than
/// bursted.
pub fn heartbeat(
    token: &CancellationToken,
    interval: Duration,
    buffer: usize,
) -> mpsc::Receiver<Instant> {
    let (tx, rx) = mpsc::channel(channel_capacity(buffer));
    let token = token.clone();

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                tick = ticker.tick() => {
                    tokio::select! {
                        sent = tx.send(tick) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = token.cancelled() => break,
                    }
                }
                _ = token.cancelled() => break,
            }
        }

        debug!("heartbeat stopped");
    });

    rx
}

/// Drains an indexed channel and restores the original submission order.
pub async fn collect_sorted<U>(mut rx: mpsc::Receiver<(usize, U)>) -> Vec<U> {
    let mut items = Vec::new();
    while let Some(pair) = rx.recv().await {
        items.push(pair);
    }
    items.sort_by_key(|(index, _)| *index);
    items.into_iter().map(|(_, value)| value).collect()
}
