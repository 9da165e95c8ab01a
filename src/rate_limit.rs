//! Fixed-window rate limiting
//!
//! Counters are keyed (`rl:api:{api_key_id}`, `rl:org:{org_id}`) and bucketed
//! by `floor(now / window)`. The backing counter store is pluggable; the
//! default is an in-process map. A limiter with no backing store fails open
//! with a logged warning.

use crate::time_provider::SharedTimeProvider;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Atomic fixed-window counter backend
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Increments the counter for `key` within `bucket` and returns the new
    /// count, or `None` when the backend is unavailable
    async fn increment(&self, key: &str, bucket: i64) -> Option<u64>;
}

/// In-process counter store over a concurrent map
///
/// Entries for stale buckets are replaced on first touch of a newer bucket,
/// which bounds the map to one entry per key.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, (i64, u64)>,
}

impl MemoryCounterStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, bucket: i64) -> Option<u64> {
        let mut entry = self.counters.entry(key.to_string()).or_insert((bucket, 0));
        if entry.0 != bucket {
            *entry = (bucket, 0);
        }
        entry.1 += 1;
        Some(entry.1)
    }
}

/// Fixed-window rate limiter
#[derive(Clone, Debug)]
pub struct RateLimiter {
    store: Option<Arc<dyn CounterStore>>,
    time: SharedTimeProvider,
}

impl RateLimiter {
    /// Builds a limiter over a counter store
    pub fn new(store: Arc<dyn CounterStore>, time: SharedTimeProvider) -> Self {
        Self {
            store: Some(store),
            time,
        }
    }

    /// Builds a limiter with no backing store; every check passes
    pub fn disabled(time: SharedTimeProvider) -> Self {
        Self { store: None, time }
    }

    /// Returns true when the caller is within `limit` for the current window
    /// after counting this call
    ///
    /// With no backing store the limiter fails open.
    pub async fn check_and_increment(&self, key: &str, limit: u64, window: Duration) -> bool {
        let Some(store) = &self.store else {
            warn!(key, "rate limiter has no backing store; allowing");
            return true;
        };
        let window_secs = window.as_secs().max(1) as i64;
        let bucket = self.time.now().timestamp() / window_secs;
        match store.increment(key, bucket).await {
            Some(count) => count <= limit.max(1),
            None => {
                warn!(key, "counter store unavailable; allowing");
                true
            }
        }
    }
}

/// Counter key for a per-API-key limit
#[must_use]
pub fn key_for_api_key(api_key_id: &str) -> String {
    format!("rl:api:{api_key_id}")
}

/// Counter key for a per-organization limit
#[must_use]
pub fn key_for_org(org_id: &str) -> String {
    format!("rl:org:{org_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::MockTimeProvider;

    fn limiter_with_clock() -> (RateLimiter, Arc<MockTimeProvider>) {
        let clock = Arc::new(MockTimeProvider::new());
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), clock.clone());
        (limiter, clock)
    }

    #[tokio::test]
    async fn enforces_limit_within_window() {
        let (limiter, _) = limiter_with_clock();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert!(limiter.check_and_increment("rl:api:k", 3, window).await);
        }
        assert!(!limiter.check_and_increment("rl:api:k", 3, window).await);
    }

    #[tokio::test]
    async fn window_rollover_resets_count() {
        let (limiter, clock) = limiter_with_clock();
        let window = Duration::from_secs(60);

        assert!(limiter.check_and_increment("rl:org:o", 1, window).await);
        assert!(!limiter.check_and_increment("rl:org:o", 1, window).await);

        clock.advance(Duration::from_secs(61));
        assert!(limiter.check_and_increment("rl:org:o", 1, window).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let (limiter, _) = limiter_with_clock();
        let window = Duration::from_secs(60);

        assert!(limiter.check_and_increment("rl:api:a", 1, window).await);
        assert!(limiter.check_and_increment("rl:api:b", 1, window).await);
    }

    #[tokio::test]
    async fn missing_store_fails_open() {
        let limiter = RateLimiter::disabled(Arc::new(MockTimeProvider::new()));
        for _ in 0..100 {
            assert!(
                limiter
                    .check_and_increment("rl:api:k", 1, Duration::from_secs(60))
                    .await
            );
        }
    }
}
