//! Resilience helpers for the market-data provider
//!
//! - Rate limiter enforcing a minimum spacing between requests
//! - Retry policy with exponential backoff

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::RetryPolicy;
