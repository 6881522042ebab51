use crate::core::cache::RateStore;
use crate::core::error::{RateError, RateResult};
use crate::core::rate::{RateKey, RateRecord};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type Flight = Shared<BoxFuture<'static, RateResult<f64>>>;
type Flights = Arc<Mutex<HashMap<RateKey, (u64, Flight)>>>;

fn lock(flights: &Flights) -> MutexGuard<'_, HashMap<RateKey, (u64, Flight)>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Durable rate cache that collapses concurrent misses for the same key into a
/// single computation.
///
/// Per key the state moves `MISS -> FETCHING -> CACHED | FAILED`. `CACHED` is
/// permanent. `FAILED` leaves nothing behind, so the next call starts over.
///
/// Each computation runs on its own task, so it finishes and deregisters even
/// when every caller waiting on it has been dropped.
#[derive(Clone)]
pub struct RateCache {
    store: Arc<dyn RateStore>,
    in_flight: Flights,
    next_flight: Arc<AtomicU64>,
}

impl RateCache {
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub async fn get(&self, key: &RateKey) -> RateResult<Option<RateRecord>> {
        self.store.get(key).await
    }

    /// Returns the record for `key`, running `compute` to produce it on a miss.
    ///
    /// At most one `compute` runs per key at a time; concurrent callers await
    /// that one and all receive its result. The record is durably written
    /// before any caller sees it. On failure nothing is written and every
    /// waiter receives the same error.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn get_or_compute<F, Fut>(&self, key: RateKey, compute: F) -> RateResult<RateRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RateResult<f64>> + Send + 'static,
    {
        if let Some(record) = self.store.get(&key).await? {
            return Ok(record);
        }

        let flight = {
            let mut flights = lock(&self.in_flight);
            match flights.get(&key) {
                Some((_, flight)) => {
                    debug!("Joining in-flight computation for key: {}", key);
                    flight.clone()
                }
                None => {
                    debug!("Starting computation for key: {}", key);
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    // The task deregisters under this same lock, so it cannot
                    // finish before the entry below is inserted.
                    let task = tokio::spawn(Self::fly(
                        Arc::clone(&self.store),
                        Arc::clone(&self.in_flight),
                        key.clone(),
                        id,
                        compute(),
                    ));
                    let flight = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(RateError::ProviderUnavailable(format!(
                                "Rate computation aborted: {e}"
                            )))
                        })
                    }
                    .boxed()
                    .shared();
                    flights.insert(key.clone(), (id, flight.clone()));
                    flight
                }
            }
        };

        let rate = flight.await?;
        Ok(RateRecord { key, rate })
    }

    async fn fly<Fut>(
        store: Arc<dyn RateStore>,
        flights: Flights,
        key: RateKey,
        id: u64,
        compute: Fut,
    ) -> RateResult<f64>
    where
        Fut: Future<Output = RateResult<f64>> + Send + 'static,
    {
        let result = Self::compute_and_store(&store, key.clone(), compute).await;
        {
            let mut flights = lock(&flights);
            if flights.get(&key).is_some_and(|(current, _)| *current == id) {
                flights.remove(&key);
            }
        }
        result
    }

    async fn compute_and_store<Fut>(
        store: &Arc<dyn RateStore>,
        key: RateKey,
        compute: Fut,
    ) -> RateResult<f64>
    where
        Fut: Future<Output = RateResult<f64>> + Send + 'static,
    {
        // A previous flight may have finished between our miss and registration.
        if let Some(record) = store.get(&key).await? {
            return Ok(record.rate);
        }
        let rate = compute.await?;
        let record = RateRecord::new(key, rate)?;
        store.put(&record).await?;
        Ok(record.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryRateStore;
    use chrono::NaiveDate;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key() -> RateKey {
        RateKey::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "USD", "EUR").unwrap()
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let store = MemoryRateStore::new();
        store.put(&RateRecord::new(key(), 0.9).unwrap()).await.unwrap();
        let cache = RateCache::new(Arc::new(store));

        let record = cache
            .get_or_compute(key(), || async {
                Err(RateError::ProviderUnavailable("compute ran on a hit".into()))
            })
            .await
            .unwrap();
        assert_eq!(record.rate, 0.9);
    }

    #[tokio::test]
    async fn test_miss_computes_and_stores() {
        let store = MemoryRateStore::new();
        let cache = RateCache::new(Arc::new(store.clone()));

        assert!(cache.get(&key()).await.unwrap().is_none());
        let record = cache
            .get_or_compute(key(), || async { Ok(0.9) })
            .await
            .unwrap();
        assert_eq!(record, RateRecord::new(key(), 0.9).unwrap());
        assert_eq!(cache.get(&key()).await.unwrap().unwrap().rate, 0.9);
        assert_eq!(store.len().await, 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_compute_once() {
        let cache = RateCache::new(Arc::new(MemoryRateStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..16).map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_compute(key(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(0.9)
                    })
                    .await
            })
        });

        for result in join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap().rate, 0.9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_reaches_all_waiters_and_is_not_stored() {
        let store = MemoryRateStore::new();
        let cache = RateCache::new(Arc::new(store.clone()));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_compute(key(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Err(RateError::ProviderUnavailable("down".into()))
                    })
                    .await
            })
        });

        for result in join_all(tasks).await {
            assert_eq!(
                result.unwrap(),
                Err(RateError::ProviderUnavailable("down".into()))
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty().await);
        assert_eq!(cache.in_flight(), 0);

        // FAILED is not terminal: the next call retries.
        let record = cache
            .get_or_compute(key(), || async { Ok(0.9) })
            .await
            .unwrap();
        assert_eq!(record.rate, 0.9);
    }

    #[tokio::test]
    async fn test_invalid_rate_is_not_stored() {
        let store = MemoryRateStore::new();
        let cache = RateCache::new(Arc::new(store.clone()));

        let result = cache.get_or_compute(key(), || async { Ok(0.0) }).await;
        assert!(matches!(result, Err(RateError::MalformedResponse(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_share_flights() {
        let cache = RateCache::new(Arc::new(MemoryRateStore::new()));
        let other = RateKey::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), "USD", "EUR").unwrap();

        let (a, b) = tokio::join!(
            cache.get_or_compute(key(), || async { Ok(0.9) }),
            cache.get_or_compute(other, || async { Ok(0.8) }),
        );
        assert_eq!(a.unwrap().rate, 0.9);
        assert_eq!(b.unwrap().rate, 0.8);
    }

    #[tokio::test]
    async fn test_abandoned_failure_deregisters_and_next_caller_recomputes() {
        let store = MemoryRateStore::new();
        let cache = RateCache::new(Arc::new(store.clone()));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_compute(key(), || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(RateError::ProviderUnavailable("down".into()))
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cache.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.in_flight(), 0);
        assert!(store.is_empty().await);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let record = cache
            .get_or_compute(key(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(0.9)
            })
            .await
            .unwrap();
        assert_eq!(record.rate, 0.9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_success_is_still_stored() {
        let store = MemoryRateStore::new();
        let cache = RateCache::new(Arc::new(store.clone()));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_compute(key(), || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(0.9)
            }),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(store.len().await, 1);
        assert_eq!(cache.get(&key()).await.unwrap().unwrap().rate, 0.9);
    }
}
