use tokio::time::Instant;

use crate::refresh::RefreshControl;

/// A stored value with the instant it was last refreshed
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub value: V,
    pub last_refresh: Instant,
}

impl<V> Entry<V> {
    /// Creates an entry refreshed at `last_refresh`
    pub fn new(value: V, last_refresh: Instant) -> Self {
        Self { value, last_refresh }
    }

    /// Creates an entry refreshed now
    pub fn fresh(value: V) -> Self {
        Self::new(value, Instant::now())
    }

    /// Time elapsed since the last refresh
    pub fn age(&self) -> std::time::Duration {
        Instant::now().saturating_duration_since(self.last_refresh)
    }
}

impl<V: Clone> Entry<V> {
    /// Derives the tri-state read for this entry under `refresh`
    pub fn state(&self, refresh: &dyn RefreshControl) -> CacheValue<V> {
        if refresh.should_refresh(self.last_refresh) {
            CacheValue::Stale(self.value.clone())
        } else {
            CacheValue::Present(self.value.clone())
        }
    }
}

/// The state of a key at the moment it was read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue<V> {
    Absent,
    Stale(V),
    Present(V),
}

impl<V> CacheValue<V> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// The value regardless of freshness
    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Absent => None,
            Self::Stale(value) | Self::Present(value) => Some(value),
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Absent => None,
            Self::Stale(value) | Self::Present(value) => Some(value),
        }
    }

    pub fn map<U, F: FnOnce(V) -> U>(self, f: F) -> CacheValue<U> {
        match self {
            Self::Absent => CacheValue::Absent,
            Self::Stale(value) => CacheValue::Stale(f(value)),
            Self::Present(value) => CacheValue::Present(f(value)),
        }
    }
}
