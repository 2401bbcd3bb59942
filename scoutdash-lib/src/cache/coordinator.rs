//! Fetch coordination over the entry store

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use futures::future::FutureExt;
use log::debug;
use log::warn;

use super::CacheConfig;
use super::CacheEntry;
use super::Clock;
use super::EntryStore;
use super::FreshnessClass;
use super::SystemClock;
use crate::flight::InFlightRegistry;
use crate::response::Response;

type Outcome<T, E> = Result<Response<T>, E>;

/// Wraps caller-supplied producers with caching, deduplication and
/// stale-on-failure fallback.
///
/// Each instance owns an independent store; construct one at startup and hand
/// clones to route handlers. Cloning is cheap (uses `Arc` internally).
///
/// The producer error type `E` must be `Clone` because every caller waiting
/// on a shared refresh receives the same failure. Wrap non-`Clone` errors in
/// an `Arc`.
///
/// # Example
///
/// ```ignore
/// use scoutdash_lib::cache::{CacheConfig, FetchCoordinator, FreshnessClass};
///
/// let cache = FetchCoordinator::<serde_json::Value, Arc<UpstreamError>>::new(CacheConfig::default());
///
/// let response = cache
///     .get_or_fetch("statbotics:event:2024casj", FreshnessClass::SemiStatic, move || async move {
///         upstream.event("2024casj").await.map_err(Arc::new)
///     })
///     .await?;
/// ```
pub struct FetchCoordinator<T, E> {
    inner: Arc<CoordinatorInner<T, E>>,
}

struct CoordinatorInner<T, E> {
    store: Mutex<EntryStore<T>>,
    in_flight: InFlightRegistry<Outcome<T, E>>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    /// Bumped by `clear`; refreshes started before a clear do not write back.
    generation: AtomicU64,
}

impl<T, E> Clone for FetchCoordinator<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> FetchCoordinator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a coordinator using the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a coordinator reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store: Mutex::new(EntryStore::new(config.max_entries)),
                in_flight: InFlightRegistry::new(),
                clock,
                config,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Returns cached data for `key`, or runs `producer` to refresh it.
    ///
    /// - A fresh entry is returned immediately and its access time updated.
    /// - Otherwise the caller joins the outstanding refresh for `key`, or
    ///   starts one. The producer is invoked at most once per refresh.
    /// - A successful refresh is stored with `stored_at = now`.
    /// - A failed refresh falls back to the existing entry, flagged `stale`.
    ///   Without an entry the producer's error is returned unchanged.
    /// - Callers that joined a refresh receive the leader's outcome, so a
    ///   degraded refresh reaches every joiner as the same `stale` fallback.
    ///
    /// The producer is never retried, and runs to completion even if this
    /// future is dropped.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        freshness_class: FreshnessClass,
        producer: F,
    ) -> Result<Response<T>, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if let Some(hit) = self.inner.lookup_fresh(key) {
            debug!("cache hit for {key}");
            return Ok(hit);
        }

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let flight = self.inner.in_flight.join_or_start(key, move || {
            inner.refresh(owned_key, freshness_class, producer).boxed()
        });

        if flight.is_leader() {
            debug!("cache miss for {key}, refreshing");
        } else {
            debug!("cache miss for {key}, joining in-flight refresh");
        }
        flight.await
    }

    /// Empties the store and forgets every in-flight registration.
    ///
    /// Refreshes still running complete for their waiters but are not written
    /// back.
    pub fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.in_flight.clear();
        self.inner.lock_store().clear();
    }

    /// Returns a copy of the entry for `key` without recording an access.
    pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        self.inner.lock_store().get(key).cloned()
    }

    /// Returns the number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.inner.lock_store().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock_store().is_empty()
    }

    /// Returns `true` if a refresh for `key` is outstanding.
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.inner.in_flight.contains(key)
    }

    /// Returns the configuration this coordinator was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

impl<T, E> CoordinatorInner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn lock_store(&self) -> MutexGuard<'_, EntryStore<T>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serves a fresh entry, recording the access. Never evicts.
    fn lookup_fresh(&self, key: &str) -> Option<Response<T>> {
        let now = self.clock.now();
        let mut store = self.lock_store();
        let entry = store.get_mut(key)?;
        if !entry.is_fresh(now) {
            return None;
        }
        entry.touch(now);
        Some(Response::fresh(
            entry.data.clone(),
            entry.stored_at,
            entry.freshness_class,
        ))
    }

    async fn refresh<F, Fut>(
        self: Arc<Self>,
        key: String,
        freshness_class: FreshnessClass,
        producer: F,
    ) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        // A refresh that settled between our miss and our registration may
        // already have written a fresh entry.
        if let Some(hit) = self.lookup_fresh(&key) {
            return Ok(hit);
        }

        let generation = self.generation.load(Ordering::Acquire);
        match producer().await {
            Ok(data) => Ok(self.commit(&key, data, freshness_class, generation)),
            Err(err) => match self.degrade(&key) {
                Some(stale) => {
                    warn!(
                        "refresh of {key} failed, serving stale data from {}",
                        stale.last_refresh()
                    );
                    Ok(stale)
                }
                None => {
                    debug!("refresh of {key} failed with nothing cached");
                    Err(err)
                }
            },
        }
    }

    fn commit(
        &self,
        key: &str,
        data: T,
        freshness_class: FreshnessClass,
        generation: u64,
    ) -> Response<T> {
        let now = self.clock.now();
        let mut store = self.lock_store();
        // Checked under the store lock so a concurrent `clear` cannot interleave.
        if self.generation.load(Ordering::Acquire) == generation {
            let evicted = store.insert(key, CacheEntry::new(data.clone(), freshness_class, now));
            if !evicted.is_empty() {
                debug!("storing {key} evicted {} entries", evicted.len());
            }
        } else {
            debug!("cache cleared while refreshing {key}, not storing");
        }
        Response::fresh(data, now, freshness_class)
    }

    fn degrade(&self, key: &str) -> Option<Response<T>> {
        let store = self.lock_store();
        let previous = store.get(key)?;
        Some(Response::stale(
            previous.data.clone(),
            previous.stored_at,
            previous.freshness_class,
        ))
    }
}
