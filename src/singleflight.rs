//! Call coalescing: concurrent duplicate requests share one execution.
//!
//! [`SingleFlight::do_call`] consults a durable [`SharedCache`] first, then
//! coalesces concurrent loads for the same key into a single loader run. The
//! leader publishes its result over a watch channel; waiters — including ones
//! arriving after completion but before the in-flight entry is cleared —
//! observe the published result instead of starting a fresh execution. The
//! in-flight entry is removed as soon as the result is published, while the
//! durable cache entry persists independently.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::cache::SharedCache;
use crate::error::{ErrorKind, TaskResult};
use crate::guard::panic_message;
use crate::task_error;

/// Result slot shared between a flight's leader and its waiters.
type FlightResult<V> = Option<TaskResult<V>>;

#[derive(Debug, Clone)]
struct Flight<V> {
    /// Distinguishes this flight from later ones for the same key, so stale
    /// waiters never clean up a successor's registry entry.
    id: u64,
    rx: watch::Receiver<FlightResult<V>>,
}

/// Coalesces concurrent duplicate loads and caches their results.
#[derive(Debug)]
pub struct SingleFlight<K, V> {
    cache: SharedCache<K, V>,
    in_flight: Mutex<HashMap<K, Flight<V>>>,
    next_flight_id: AtomicU64,
}

enum Role<V> {
    Leader {
        id: u64,
        tx: watch::Sender<FlightResult<V>>,
    },
    Waiter(Flight<V>),
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Creates an empty single-flight registry with an empty durable cache.
    pub fn new() -> Self {
        Self {
            cache: SharedCache::new(),
            in_flight: Mutex::new(HashMap::new()),
            next_flight_id: AtomicU64::new(0),
        }
    }

    /// Returns the durable cached value for `key` without coalescing.
    pub fn cached(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    /// Drops the durable cache entry for `key`; in-flight coalescing is
    /// unaffected.
    pub fn invalidate(&self, key: &K) {
        self.cache.remove(key);
    }

    /// Loads the value for `key`, executing `loader` at most once across all
    /// concurrent callers. A successful result is stored in the durable cache
    /// for future fast-path lookups; every coalesced caller receives a clone
    /// of the same result or error.
    pub async fn do_call<F, Fut>(&self, key: K, loader: F) -> TaskResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaskResult<V>>,
    {
        // Durable cache is consulted before any coalescing is attempted.
        if let Some(value) = self.cache.get(&key) {
            trace!(key = ?key, "single-flight cache hit");
            return Ok(value);
        }

        let role = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => Role::Waiter(entry.get().clone()),
                Entry::Vacant(entry) => {
                    let id = self.next_flight_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    entry.insert(Flight { id, rx });
                    Role::Leader { id, tx }
                }
            }
        };

        match role {
            Role::Leader { id, tx } => {
                debug!(key = ?key, "executing single-flight loader");

                let result = match AssertUnwindSafe(loader()).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(task_error!(
                        ErrorKind::InternalFault,
                        "single-flight loader panicked",
                        panic_message(payload.as_ref())
                    )),
                };

                if let Ok(value) = &result {
                    self.cache.insert(key.clone(), value.clone());
                }

                self.remove_flight(&key, id);
                tx.send_replace(Some(result.clone()));

                result
            }
            Role::Waiter(flight) => {
                let mut rx = flight.rx;
                match rx.wait_for(Option::is_some).await {
                    Ok(published) => match (*published).clone() {
                        Some(result) => result,
                        // `wait_for` guarantees the slot is filled.
                        None => Err(task_error!(
                            ErrorKind::InternalFault,
                            "single-flight result slot was empty"
                        )),
                    },
                    Err(_) => {
                        // The leader was dropped before publishing. Clear the
                        // dead entry so a later caller can start a new flight.
                        self.remove_flight(&key, flight.id);
                        Err(task_error!(
                            ErrorKind::InternalFault,
                            "single-flight leader dropped before publishing a result"
                        ))
                    }
                }
            }
        }
    }

    /// Removes the registry entry for `key` if it still belongs to flight `id`.
    fn remove_flight(&self, key: &K, id: u64) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(flight) = in_flight.get(key)
            && flight.id == id
        {
            in_flight.remove(key);
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_execution() {
        let flight = Arc::new(SingleFlight::<&str, String>::new());
        let executions = Arc::new(AtomicU32::new(0));

        let mut callers = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let executions = executions.clone();
            callers.push(tokio::spawn(async move {
                flight
                    .do_call("config", || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        Ok("value:config".to_string())
                    })
                    .await
            }));
        }

        for caller in callers {
            let value = caller.await.unwrap().unwrap();
            assert_eq!(value, "value:config");
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_value_is_served_from_durable_cache() {
        let flight = SingleFlight::<&str, u32>::new();
        let executions = AtomicU32::new(0);

        for _ in 0..3 {
            let value = flight
                .do_call("answer", || async {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(flight.cached(&"answer"), Some(42));
    }

    #[tokio::test]
    async fn loader_error_is_shared_and_not_cached() {
        let flight = SingleFlight::<&str, u32>::new();

        let err = flight
            .do_call("broken", || async {
                Err(task_error!(ErrorKind::TaskFailed, "load failed"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskFailed);

        // Errors are not cached; the next call executes the loader again.
        let value = flight.do_call("broken", || async { Ok(9) }).await.unwrap();
        assert_eq!(value, 9);
    }

    #[tokio::test]
    async fn panicking_loader_reports_internal_fault() {
        let flight = SingleFlight::<&str, u32>::new();

        let err = flight
            .do_call("explosive", || async { panic!("loader blew up") })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalFault);

        // The dead flight is cleared, so a new load succeeds.
        let value = flight.do_call("explosive", || async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_load() {
        let flight = SingleFlight::<&str, u32>::new();
        let executions = AtomicU32::new(0);

        for expected in 1..=2 {
            flight
                .do_call("counter", || async {
                    Ok(executions.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await
                .unwrap();
            assert_eq!(flight.cached(&"counter"), Some(expected));
            flight.invalidate(&"counter");
        }
    }
}
