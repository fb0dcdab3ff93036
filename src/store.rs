//! The keyed store: current values, their freshness, and per-key
//! update feeds.
//!
//! Every key maps to a [`Slot`] inside a sharded map. All mutations of a key
//! (replacing the entry and pushing the new state to subscribers) happen while
//! holding that key's shard lock, so subscribers observe writes in exactly the
//! order they were committed. Keys in different shards never contend.

use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::CacheConfig;
use crate::error::ConfigError;
use crate::refresh::RefreshControl;
use crate::value::{CacheValue, Entry};

struct Slot<V> {
    entry: Option<Entry<V>>,
    subscribers: Vec<mpsc::UnboundedSender<CacheValue<V>>>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            entry: None,
            subscribers: Vec::new(),
        }
    }
}

impl<V: Clone> Slot<V> {
    fn state(&self, refresh: &dyn RefreshControl) -> CacheValue<V> {
        match &self.entry {
            Some(entry) => entry.state(refresh),
            None => CacheValue::Absent,
        }
    }

    /// Pushes the current state to every live subscriber, dropping closed ones.
    fn notify(&mut self, refresh: &dyn RefreshControl) {
        if self.subscribers.is_empty() {
            return;
        }
        let state = self.state(refresh);
        self.subscribers.retain(|tx| tx.send(state.clone()).is_ok());
        tracing::trace!(subscribers = self.subscribers.len(), "notified subscribers");
    }
}

impl<V> Slot<V> {
    fn prune_closed(&mut self) {
        self.subscribers.retain(|tx| !tx.is_closed());
    }

    fn is_vacant(&self) -> bool {
        self.entry.is_none() && self.subscribers.is_empty()
    }
}

/// A concurrent map of keys to values with freshness tracking and live
/// per-key subscriptions. Never fetches anything itself.
pub struct KeyedStore<K, V> {
    slots: Arc<DashMap<K, Slot<V>>>,
    refresh: Box<dyn RefreshControl>,
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty store judging staleness with `refresh`
    pub fn new(refresh: impl RefreshControl + 'static) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            refresh: Box::new(refresh),
        }
    }

    /// Creates an empty store from a validated configuration
    pub fn with_config(config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let slots = match config.shard_amount {
            Some(amount) => DashMap::with_shard_amount(amount),
            None => DashMap::new(),
        };
        Ok(Self {
            slots: Arc::new(slots),
            refresh: Box::new(config.refresh),
        })
    }

    /// The staleness policy of this store
    pub fn refresh_control(&self) -> &dyn RefreshControl {
        self.refresh.as_ref()
    }

    /// Reads the current state of `key` without blocking or fetching
    pub fn get(&self, key: &K) -> CacheValue<V> {
        match self.slots.get(key) {
            Some(slot) => slot.state(self.refresh.as_ref()),
            None => CacheValue::Absent,
        }
    }

    /// Snapshot of the stored entry, including its refresh timestamp
    pub fn entry(&self, key: &K) -> Option<Entry<V>> {
        self.slots.get(key).and_then(|slot| slot.entry.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.entry.is_some())
    }

    /// Replaces the entry for `key` with a freshly refreshed value and
    /// notifies its subscribers. Returns the previous value.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        let mut slot = self.slots.entry(key).or_default();
        let previous = slot.entry.replace(Entry::fresh(value)).map(|entry| entry.value);
        slot.notify(self.refresh.as_ref());
        previous
    }

    /// Deletes the entry for `key` and notifies its subscribers of `Absent`.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut removed = None;
        self.slots.remove_if_mut(key, |_, slot| {
            removed = slot.entry.take().map(|entry| entry.value);
            slot.notify(self.refresh.as_ref());
            slot.is_vacant()
        });
        removed
    }

    /// Deletes every entry and notifies every subscriber of `Absent`.
    ///
    /// Fetches already in flight are not cancelled and still write their
    /// result back when they finish.
    pub fn remove_all(&self) {
        let mut cleared = 0usize;
        self.slots.retain(|_, slot| {
            if slot.entry.take().is_some() {
                cleared += 1;
            }
            slot.notify(self.refresh.as_ref());
            !slot.is_vacant()
        });
        tracing::debug!(cleared, "removed all entries");
    }

    /// Subscribes to `key`. The subscription yields the current state
    /// immediately, then the state after every later `set`/`remove`.
    pub fn stream(&self, key: K) -> Subscription<K, V> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.slots.entry(key.clone()).or_default();
        slot.prune_closed();
        // The receiver is held right here, so the send cannot fail.
        let _ = tx.send(slot.state(self.refresh.as_ref()));
        slot.subscribers.push(tx);
        tracing::trace!(subscribers = slot.subscribers.len(), "new subscription");
        Subscription {
            inner: UnboundedReceiverStream::new(rx),
            slots: Arc::downgrade(&self.slots),
            key,
        }
    }

    /// Number of live subscriptions for `key`
    pub fn subscriber_count(&self, key: &K) -> usize {
        let mut count = 0;
        self.slots.remove_if_mut(key, |_, slot| {
            slot.prune_closed();
            count = slot.subscribers.len();
            slot.is_vacant()
        });
        count
    }

    /// Number of keys holding a value
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live feed of state changes for one key. Dropping it unsubscribes.
pub struct Subscription<K: Eq + Hash, V> {
    inner: UnboundedReceiverStream<CacheValue<V>>,
    slots: Weak<DashMap<K, Slot<V>>>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for Subscription<K, V> {
    fn drop(&mut self) {
        // Closing first makes our sender count as closed when pruning.
        self.inner.close();
        if let Some(slots) = self.slots.upgrade() {
            slots.remove_if_mut(&self.key, |_, slot| {
                slot.prune_closed();
                slot.is_vacant()
            });
        }
    }
}

// The key is never pinned; only the receiver is polled.
impl<K: Eq + Hash, V> Unpin for Subscription<K, V> {}

impl<K: Eq + Hash, V> Stream for Subscription<K, V> {
    type Item = CacheValue<V>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
