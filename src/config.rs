use crate::error::ConfigError;
use crate::refresh::RefreshPolicy;

/// Configuration for a [`KeyedStore`](crate::KeyedStore)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    pub refresh: RefreshPolicy,
    /// Number of lock shards; `None` uses the map's default.
    pub shard_amount: Option<usize>,
}

impl CacheConfig {
    pub fn new(refresh: RefreshPolicy) -> Self {
        Self {
            refresh,
            shard_amount: None,
        }
    }

    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = Some(shard_amount);
        self
    }

    /// Checks the shard amount is a power of two greater than one
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.shard_amount {
            Some(amount) if amount <= 1 || !amount.is_power_of_two() => {
                Err(ConfigError::InvalidShardAmount(amount))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.refresh, RefreshPolicy::Periodic(Duration::from_secs(60)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shard_amount_validation() {
        let config = CacheConfig::new(RefreshPolicy::Never);
        assert!(config.clone().with_shard_amount(16).validate().is_ok());
        assert_eq!(
            config.clone().with_shard_amount(12).validate(),
            Err(ConfigError::InvalidShardAmount(12))
        );
        assert_eq!(
            config.with_shard_amount(1).validate(),
            Err(ConfigError::InvalidShardAmount(1))
        );
    }
}
