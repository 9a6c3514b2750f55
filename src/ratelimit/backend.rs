//! Rate limit storage abstraction.

use async_trait::async_trait;

use super::limiter::RateLimitDecision;
use crate::error::Result;

/// Trait for rate limit stores.
///
/// The HTTP guard works against this trait so the in-process
/// [`RateLimiter`](super::RateLimiter) can later be swapped for a store
/// shared between instances.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Record one request against `key` and return the decision.
    async fn consume(&self, key: &str, limit: u64, window_ms: u64) -> Result<RateLimitDecision>;

    /// Drop expired windows, returning how many were removed.
    async fn sweep(&self) -> usize;
}
