//! At most one outstanding execution per key.
//!
//! The first caller for a key spawns the work on its own task and installs a
//! shared handle to it; callers arriving while it is pending await the same
//! handle and receive a clone of its output. The task clears its own entry
//! when it finishes, whether or not anyone is still waiting, so the next call
//! always starts a fresh execution.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;

/// The spawned execution panicked or was cancelled by the runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct FlightAborted(pub String);

type Pending<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;
type Inflight<K, T> = Arc<Mutex<HashMap<K, Pending<T>>>>;

/// Removes the entry for `key` when dropped, including on panic.
struct EntryGuard<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    registry: Inflight<K, T>,
    key: Option<K>,
}

impl<K, T> Drop for EntryGuard<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }
}

pub struct SingleFlight<K, T>
where
    T: Clone,
{
    inflight: Inflight<K, T>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `work` for `key` unless an execution is already pending, in which
    /// case join it. `work` is only invoked by the caller that installs the
    /// entry. Dropping the returned future never cancels the execution.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<T, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let pending = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(&key) {
                Some(pending) => pending.clone(),
                None => {
                    let guard = EntryGuard {
                        registry: Arc::clone(&self.inflight),
                        key: Some(key.clone()),
                    };
                    let fut = work();
                    // The map lock is held until the entry is inserted, so the
                    // task cannot clear it before it exists.
                    let task = tokio::spawn(async move {
                        let _guard = guard;
                        fut.await
                    });
                    let pending = task
                        .map(|joined| joined.map_err(|err| FlightAborted(err.to_string())))
                        .boxed()
                        .shared();
                    inflight.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    pub fn is_inflight(&self, key: &K) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let flight: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let calls = (0..8).map(|_| {
            let flight = Arc::clone(&flight);
            let executions = Arc::clone(&executions);
            async move {
                flight
                    .run("key", || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        7
                    })
                    .await
            }
        });

        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(|value| *value == Ok(7)));
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(flight.inflight_count(), 0);
    }

    #[tokio::test]
    async fn completed_entry_allows_fresh_execution() {
        let flight: SingleFlight<u8, usize> = SingleFlight::new();
        let executions = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let counter = Arc::clone(&executions);
            let value = flight
                .run(0, || async move { counter.fetch_add(1, Ordering::SeqCst) + 1 })
                .await;
            assert_eq!(value, Ok(expected));
            assert!(!flight.is_inflight(&0));
        }
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let flight: Arc<SingleFlight<u8, u8>> = Arc::new(SingleFlight::new());
        let (a, b) = tokio::join!(
            flight.run(1, || async { 1 }),
            flight.run(2, || async { 2 })
        );
        assert_eq!((a, b), (Ok(1), Ok(2)));
    }

    #[tokio::test]
    async fn entry_clears_when_every_waiter_is_dropped() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let executions = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&executions);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            flight.run(0, || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                1
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(flight.is_inflight(&0));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!flight.is_inflight(&0));

        let counter = Arc::clone(&executions);
        let value = flight
            .run(0, || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                2
            })
            .await;
        assert_eq!(value, Ok(2));
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_work_is_reported_and_cleared() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();

        let outcome = flight
            .run(0, || async { None::<u8>.expect("work panicked") })
            .await;

        assert!(outcome.is_err());
        assert_eq!(flight.inflight_count(), 0);
    }
}
