//! Time abstraction layer for testable time-dependent operations
//!
//! Bidding windows, receipt timestamps, and the background sweeps all read
//! the clock through [`TimeProvider`], so tests can age contracts and skip
//! sleeps without waiting for real time to pass.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::time::sleep as tokio_sleep;

/// Trait for providing time-related functionality
///
/// Allows dependency injection of time behavior, enabling fast test
/// execution without real-time delays.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Sleep for the specified duration
    async fn sleep(&self, duration: Duration);

    /// Get the current wall-clock time
    #[must_use]
    fn now(&self) -> DateTime<Utc>;
}

/// Real time provider for production use
#[derive(Debug, Clone, Default)]
pub struct RealTimeProvider;

impl RealTimeProvider {
    /// Creates a new real time provider
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for RealTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio_sleep(duration).await;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock time provider for testing
///
/// Sleeps complete almost immediately, and [`MockTimeProvider::advance`]
/// shifts the reported clock forward so age-based logic (bidding windows,
/// execution deadlines) can be exercised synchronously.
#[derive(Debug, Default)]
pub struct MockTimeProvider {
    offset_ms: AtomicI64,
}

impl MockTimeProvider {
    /// Creates a new mock time provider at the current wall clock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shifts the reported clock forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeProvider for MockTimeProvider {
    async fn sleep(&self, duration: Duration) {
        // Yield for at most 1ms so concurrent tasks still interleave.
        if duration > Duration::from_millis(1) {
            tokio_sleep(Duration::from_millis(1)).await;
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Type alias for shared time provider
pub type SharedTimeProvider = Arc<dyn TimeProvider>;

/// Create a production time provider
#[must_use]
pub fn production_time_provider() -> SharedTimeProvider {
    Arc::new(RealTimeProvider::new())
}
