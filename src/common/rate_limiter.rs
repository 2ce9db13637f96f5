//! Rate limiter enforcing a minimum interval between requests
//!
//! Public quote endpoints throttle bursts aggressively, so requests are spaced
//! out rather than counted per second.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Minimum time between the start of two requests
    pub min_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(250),
        }
    }
}

impl RateLimiterConfig {
    /// Create a new configuration with a custom minimum interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }
}

/// Spaces requests at least `min_interval` apart
///
/// # Example
///
/// ```
/// use technical_analysis::common::{RateLimiter, RateLimiterConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = RateLimiterConfig::default().with_min_interval(Duration::from_millis(10));
///     let limiter = RateLimiter::new(config);
///
///     // Acquire a slot before making a request
///     limiter.acquire().await;
///     // Make API request...
/// }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            min_interval: config.min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until the next request slot.
    ///
    /// Slots are handed out in call order; the lock is released before
    /// sleeping so later callers can queue up behind this one.
    pub async fn acquire(&self) {
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot
        };
        sleep_until(slot).await;
    }
}
