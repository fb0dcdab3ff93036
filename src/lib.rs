//! A generic per-key async cache with staleness control
//!
//! This crate provides a [`KeyedStore`] holding values together with the
//! instant they were last refreshed, and a [`CachedValue`] that fetches
//! missing or stale values through a caller-supplied async function.
//! Concurrent requests for the same key share a single fetch, and every
//! change to a key is pushed, in commit order, to its live subscriptions.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use keyed_cache::{CachedValue, KeyedStore, RefreshPolicy};
//!
//! # async fn run() {
//! let store = Arc::new(KeyedStore::new(RefreshPolicy::periodic(Duration::from_secs(30))));
//! let balances: CachedValue<String, u64, String> = CachedValue::new(store, |account: String| async move {
//!     Ok(account.len() as u64)
//! });
//!
//! let balance = balances.get("alice".to_string()).await;
//! assert_eq!(balance, Ok(5));
//! # }
//! ```

pub mod cached;
pub mod config;
pub mod error;
pub mod refresh;
pub mod store;
pub mod value;

pub use cached::CachedValue;
pub use config::CacheConfig;
pub use error::{ConfigError, FetchError};
pub use refresh::{RefreshControl, RefreshPolicy};
pub use store::{KeyedStore, Subscription};
pub use value::{CacheValue, Entry};
