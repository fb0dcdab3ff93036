//! Staleness policies.

use std::time::Duration;

use tokio::time::Instant;

/// Decides whether an entry refreshed at a given instant is stale.
pub trait RefreshControl: Send + Sync {
    /// Returns `true` when an entry last refreshed at `last_refresh` should be
    /// fetched again.
    fn should_refresh(&self, last_refresh: Instant) -> bool {
        self.should_refresh_at(last_refresh, Instant::now())
    }

    /// Same as [`RefreshControl::should_refresh`] with an explicit `now`.
    fn should_refresh_at(&self, last_refresh: Instant, now: Instant) -> bool;

    /// Whether every new stream subscription forces a refresh.
    fn refresh_on_subscribe(&self) -> bool {
        false
    }
}

/// Built-in refresh strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Stale once `now - last_refresh >= interval`.
    Periodic(Duration),
    /// Never stale by age; each new stream subscription refreshes once.
    OnSubscriptionOnly,
    /// Never stale until removed.
    Never,
}

impl RefreshPolicy {
    pub fn periodic(interval: Duration) -> Self {
        Self::Periodic(interval)
    }

    /// The periodic interval, if any.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Periodic(interval) => Some(*interval),
            Self::OnSubscriptionOnly | Self::Never => None,
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::Periodic(Duration::from_secs(60))
    }
}

impl RefreshControl for RefreshPolicy {
    fn should_refresh_at(&self, last_refresh: Instant, now: Instant) -> bool {
        match self {
            Self::Periodic(interval) => now.saturating_duration_since(last_refresh) >= *interval,
            Self::OnSubscriptionOnly | Self::Never => false,
        }
    }

    fn refresh_on_subscribe(&self) -> bool {
        matches!(self, Self::OnSubscriptionOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periodic_boundary_is_stale() {
        let policy = RefreshPolicy::periodic(Duration::from_secs(3));
        let start = Instant::now();

        assert!(!policy.should_refresh_at(start, start));
        assert!(!policy.should_refresh_at(start, start + Duration::from_millis(2999)));
        assert!(policy.should_refresh_at(start, start + Duration::from_secs(3)));
        assert!(policy.should_refresh_at(start, start + Duration::from_secs(10)));
    }

    #[test]
    fn test_zero_interval_is_always_stale() {
        let policy = RefreshPolicy::periodic(Duration::ZERO);
        let start = Instant::now();
        assert!(policy.should_refresh_at(start, start));
    }

    #[test]
    fn test_non_periodic_policies_never_age() {
        let start = Instant::now();
        let later = start + Duration::from_secs(60 * 60 * 24);

        assert!(!RefreshPolicy::Never.should_refresh_at(start, later));
        assert!(!RefreshPolicy::OnSubscriptionOnly.should_refresh_at(start, later));
        assert!(RefreshPolicy::OnSubscriptionOnly.refresh_on_subscribe());
        assert!(!RefreshPolicy::Never.refresh_on_subscribe());
        assert_eq!(RefreshPolicy::Never.interval(), None);
    }

    #[test]
    fn test_timestamp_in_future_is_fresh() {
        let policy = RefreshPolicy::periodic(Duration::from_secs(1));
        let now = Instant::now();
        assert!(!policy.should_refresh_at(now + Duration::from_secs(5), now));
    }
}
