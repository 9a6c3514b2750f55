//! Fixed-window counter state.

/// Longest accepted window: 100 years of 365 days.
///
/// Keeps `now + window` well inside the range of a UTC timestamp so the
/// reset time can always be rendered.
pub const MAX_WINDOW_MS: u64 = 100 * 365 * 86_400_000;

/// One throttling interval for one key.
///
/// A window is never rolled forward in place: once `now >= reset_at_ms` the
/// next observation replaces it with a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Requests observed so far in this interval
    pub count: u64,
    /// Absolute end of the interval, in epoch milliseconds
    pub reset_at_ms: u64,
}

impl Window {
    /// Start an empty window at `now_ms`.
    pub fn fresh(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            reset_at_ms: now_ms.saturating_add(window_ms),
        }
    }

    /// Whether the interval has ended at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }

    /// Count one request and return the new count.
    pub fn record(&mut self) -> u64 {
        self.count += 1;
        self.count
    }

    /// Milliseconds left in the interval, zero once expired.
    pub fn millis_until_reset(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms)
    }
}
