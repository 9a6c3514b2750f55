//! Core fixed-window rate limiter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use http::HeaderMap;
use tracing::{debug, trace};

use super::backend::RateLimitBackend;
use super::clock::{Clock, SystemClock};
use super::guard::build_headers;
use super::policy::RateLimitPolicy;
use super::window::{Window, MAX_WINDOW_MS};
use crate::error::{GuardError, Result};

/// The outcome of one [`RateLimiter::consume`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// The limit the request was checked against
    pub limit: u64,
    /// Whether the request fits under the limit
    pub allowed: bool,
    /// Requests left in the window
    pub remaining: u64,
    /// End of the current window, in epoch milliseconds
    pub reset_at_ms: u64,
    /// Whole seconds until the window resets; only set when denied
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitDecision {
    /// End of the current window as a UTC timestamp.
    ///
    /// Clamped to [`DateTime::<Utc>::MAX_UTC`] when `reset_at_ms` is beyond
    /// what a timestamp can represent.
    pub fn reset_at(&self) -> DateTime<Utc> {
        i64::try_from(self.reset_at_ms)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The `X-RateLimit-*` (and, when denied, `Retry-After`) headers.
    pub fn headers(&self) -> HeaderMap {
        build_headers(self)
    }
}

/// In-process fixed-window rate limiter.
///
/// Windows live in a [`DashMap`] keyed by the rendered key string. Every
/// mutation of a window happens under its shard lock, and the clock is read
/// while that lock is held, so a concurrent [`sweep`](Self::sweep) can never
/// remove a window that is still being counted against.
pub struct RateLimiter<C: Clock = SystemClock> {
    windows: DashMap<String, Window>,
    clock: C,
}

impl RateLimiter<SystemClock> {
    /// Create a rate limiter driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for RateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter with an explicit clock.
    pub fn with_clock(clock: C) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Record one request against `key` and decide whether it is allowed.
    ///
    /// The first call after a window expires starts a new window and is
    /// counted in it, so it observes `count == 1`.
    pub fn consume(&self, key: &str, limit: u64, window_ms: u64) -> Result<RateLimitDecision> {
        if key.is_empty() {
            return Err(GuardError::InvalidArgument("key must not be empty".into()));
        }
        if limit == 0 {
            return Err(GuardError::InvalidArgument("limit must be positive".into()));
        }
        if window_ms == 0 {
            return Err(GuardError::InvalidArgument("window must be positive".into()));
        }
        if window_ms > MAX_WINDOW_MS {
            return Err(GuardError::InvalidArgument(format!(
                "window must not exceed {} ms",
                MAX_WINDOW_MS
            )));
        }

        let (window, now) = match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let now = self.clock.now_ms();
                let window = occupied.get_mut();
                if window.is_expired(now) {
                    trace!(key = %key, previous_count = window.count, "Window expired, starting a new one");
                    *window = Window::fresh(now, window_ms);
                }
                window.record();
                (*window, now)
            }
            Entry::Vacant(vacant) => {
                let now = self.clock.now_ms();
                debug!(key = %key, limit = limit, window_ms = window_ms, "Creating new rate limit window");
                let mut window = Window::fresh(now, window_ms);
                window.record();
                vacant.insert(window);
                (window, now)
            }
        };

        let allowed = window.count <= limit;
        let retry_after_seconds = if allowed {
            None
        } else {
            Some(window.millis_until_reset(now).div_ceil(1000))
        };

        trace!(
            key = %key,
            count = window.count,
            limit = limit,
            allowed = allowed,
            "Consumed rate limit"
        );
        if !allowed {
            debug!(key = %key, count = window.count, limit = limit, "Rate limit exceeded");
        }

        Ok(RateLimitDecision {
            count: window.count,
            limit,
            allowed,
            remaining: limit.saturating_sub(window.count),
            reset_at_ms: window.reset_at_ms,
            retry_after_seconds,
        })
    }

    /// [`consume`](Self::consume) using a policy's scope, limit and window.
    pub fn consume_policy(&self, policy: &RateLimitPolicy, identifier: &str) -> Result<RateLimitDecision> {
        let key = policy.key_for(identifier);
        self.consume(&key.to_string_key(), policy.limit, policy.window_ms)
    }

    /// Remove every window whose reset time has passed.
    ///
    /// Returns the number of windows removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.windows.retain(|_, window| {
            if window.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        debug!(removed = removed, remaining = self.windows.len(), "Swept expired rate limit windows");
        removed
    }

    /// Count in the active window for `key`, if one exists.
    pub fn get_count(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.windows
            .get(key)
            .filter(|window| !window.is_expired(now))
            .map(|window| window.count)
    }

    /// Number of stored windows, expired ones included until swept.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Clear all windows.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

#[async_trait]
impl<C: Clock + 'static> RateLimitBackend for RateLimiter<C> {
    async fn consume(&self, key: &str, limit: u64, window_ms: u64) -> Result<RateLimitDecision> {
        RateLimiter::consume(self, key, limit, window_ms)
    }

    async fn sweep(&self) -> usize {
        RateLimiter::sweep(self)
    }
}
