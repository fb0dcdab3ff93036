//! Fetch orchestration on top of a [`KeyedStore`].
//!
//! [`CachedValue`] serves fresh values straight from the store and otherwise
//! runs the caller-supplied fetch function. Concurrent requests for the same
//! key share one in-flight fetch: the first caller spawns it, later callers
//! attach to the same [`Shared`] future until it completes. Fetches run on
//! their own tokio task, so a caller that stops waiting never cancels the
//! fetch for the others.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures::future::{self, BoxFuture, Shared};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::store::KeyedStore;
use crate::value::CacheValue;

type FetchFn<K, V, E> = dyn Fn(K) -> BoxFuture<'static, Result<V, E>> + Send + Sync;
type SharedFetch<V, E> = Shared<BoxFuture<'static, Result<V, FetchError<E>>>>;

struct InFlight<V, E> {
    id: u64,
    fetch: SharedFetch<V, E>,
    waiters: usize,
}

struct Inner<K, V, E> {
    store: Arc<KeyedStore<K, V>>,
    fetch: Box<FetchFn<K, V, E>>,
    in_flight: DashMap<K, InFlight<V, E>>,
    next_flight: AtomicU64,
}

/// Clears the in-flight slot when the fetch task ends, however it ends.
struct FlightGuard<K: Eq + Hash, V, E> {
    inner: Arc<Inner<K, V, E>>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, V, E> Drop for FlightGuard<K, V, E> {
    fn drop(&mut self) {
        let id = self.id;
        self.inner
            .in_flight
            .remove_if(&self.key, |_, flight| flight.id == id);
    }
}

/// Releases one caller's place on a flight when it stops waiting.
struct WaiterGuard<K: Eq + Hash, V, E> {
    inner: Arc<Inner<K, V, E>>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, V, E> Drop for WaiterGuard<K, V, E> {
    fn drop(&mut self) {
        if let Some(mut flight) = self.inner.in_flight.get_mut(&self.key)
            && flight.id == self.id
        {
            flight.waiters = flight.waiters.saturating_sub(1);
        }
    }
}

/// A keyed cache that fetches missing or stale values on demand.
///
/// Cloning is cheap; clones share the store and the in-flight fetches.
/// `get` and `stream` spawn tokio tasks and must run inside a tokio runtime.
pub struct CachedValue<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for CachedValue<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> CachedValue<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a cache writing fetched values into `store`
    pub fn new<F, Fut>(store: Arc<KeyedStore<K, V>>, fetch: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let fetch: Box<FetchFn<K, V, E>> = Box::new(move |key| fetch(key).boxed());
        Self {
            inner: Arc::new(Inner {
                store,
                fetch,
                in_flight: DashMap::new(),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<KeyedStore<K, V>> {
        &self.inner.store
    }

    /// Returns the stored value if it is fresh, fetching it otherwise
    pub async fn get(&self, key: K) -> Result<V, FetchError<E>> {
        self.get_with(key, false).await
    }

    /// Like [`CachedValue::get`], but `force_fetch` skips the freshness check.
    ///
    /// A fetch already in flight for the key is joined rather than duplicated.
    /// Failures leave the store untouched.
    pub async fn get_with(&self, key: K, force_fetch: bool) -> Result<V, FetchError<E>> {
        if !force_fetch
            && let CacheValue::Present(value) = self.inner.store.get(&key)
        {
            return Ok(value);
        }

        let (fetch, id) = match self.inner.in_flight.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let flight = occupied.get_mut();
                flight.waiters += 1;
                debug!(flight = flight.id, waiters = flight.waiters, "joining in-flight fetch");
                (flight.fetch.clone(), flight.id)
            }
            MapEntry::Vacant(vacant) => {
                // A fetch may have landed between the first read and taking the slot.
                if !force_fetch
                    && let CacheValue::Present(value) = self.inner.store.get(&key)
                {
                    return Ok(value);
                }
                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let fetch = self.spawn_fetch(key.clone(), id);
                vacant.insert(InFlight {
                    id,
                    fetch: fetch.clone(),
                    waiters: 1,
                });
                (fetch, id)
            }
        };

        let _waiting = WaiterGuard {
            inner: Arc::clone(&self.inner),
            key,
            id,
        };
        fetch.await
    }

    fn spawn_fetch(&self, key: K, id: u64) -> SharedFetch<V, E> {
        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key,
            id,
        };

        let task = tokio::spawn(async move {
            debug!(flight = id, "fetch started");
            let result = (guard.inner.fetch)(guard.key.clone()).await;
            match &result {
                Ok(value) => {
                    guard.inner.store.set(guard.key.clone(), value.clone());
                    debug!(flight = id, "fetch succeeded");
                }
                Err(_) => debug!(flight = id, "fetch failed"),
            }
            drop(guard);
            result.map_err(FetchError::Failed)
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    warn!(flight = id, error = %err, "fetch task aborted");
                    Err(FetchError::Aborted)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Live values for `key`.
    ///
    /// Emits the current value (stale values only when `skip_stale` is false)
    /// and then every value written to the store. When the first observed
    /// state is absent, or stale with `skip_stale` set, one background `get`
    /// is started as the stream is first polled; its success arrives through
    /// the store, its failure is emitted once as an `Err` on this stream.
    /// Stores refreshing on subscription force that fetch for every stream.
    pub fn stream(&self, key: K, skip_stale: bool) -> BoxStream<'static, Result<V, FetchError<E>>> {
        let subscription = self.inner.store.stream(key.clone());
        let force = self.inner.store.refresh_control().refresh_on_subscribe();
        let (error_tx, error_rx) = oneshot::channel();
        let mut trigger = Some((self.clone(), key, error_tx));

        let updates = subscription.filter_map(move |state| {
            if let Some((cache, key, error_tx)) = trigger.take() {
                let needs_fetch = force
                    || match &state {
                        CacheValue::Absent => true,
                        CacheValue::Stale(_) => skip_stale,
                        CacheValue::Present(_) => false,
                    };
                if needs_fetch {
                    cache.spawn_refresh(key, force, error_tx);
                }
            }

            future::ready(match state {
                CacheValue::Present(value) => Some(Ok(value)),
                CacheValue::Stale(value) if !skip_stale => Some(Ok(value)),
                CacheValue::Stale(_) | CacheValue::Absent => None,
            })
        });

        let failures = error_rx
            .into_stream()
            .filter_map(|received| future::ready(received.ok().map(Err)));

        stream::select(updates, failures).boxed()
    }

    /// Same as [`CachedValue::stream`] with stale values included.
    pub fn stream_all(&self, key: K) -> BoxStream<'static, Result<V, FetchError<E>>> {
        self.stream(key, false)
    }

    fn spawn_refresh(self, key: K, force: bool, error_tx: oneshot::Sender<FetchError<E>>) {
        tokio::spawn(async move {
            if let Err(err) = self.get_with(key, force).await {
                warn!(aborted = err.is_aborted(), "background refresh failed");
                // The stream may already be gone.
                let _ = error_tx.send(err);
            }
        });
    }

    /// Writes a value directly, as if it had been fetched
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.inner.store.set(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.store.remove(key)
    }

    /// Clears the store. Fetches already in flight keep running and write
    /// their result back when they finish.
    pub fn remove_all(&self) {
        self.inner.store.remove_all()
    }

    /// Whether a fetch for `key` is currently running
    pub fn is_fetching(&self, key: &K) -> bool {
        self.inner.in_flight.contains_key(key)
    }

    /// Callers attached to the running fetch for `key`, zero if none
    pub fn waiters(&self, key: &K) -> usize {
        self.inner
            .in_flight
            .get(key)
            .map_or(0, |flight| flight.waiters)
    }

    /// Number of keys with a fetch running
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }
}
