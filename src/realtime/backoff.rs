//! Reconnect delay policies.

use std::time::Duration;

use rand::Rng;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

/// How long to wait before each reconnect attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Retry forever with the same delay.
    Fixed {
        /// Delay before every attempt
        interval: Duration,
    },
    /// Grow the delay geometrically, optionally with jitter and an attempt cap.
    Exponential {
        /// Delay before the first attempt
        initial: Duration,
        /// Upper bound for any delay
        max: Duration,
        /// Growth factor per attempt
        multiplier: f64,
        /// Randomize each delay within `[delay / 2, delay]`
        jitter: bool,
        /// Give up after this many attempts
        max_attempts: Option<u32>,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed-delay retry.
    pub fn fixed(interval: Duration) -> Self {
        ReconnectPolicy::Fixed { interval }
    }

    /// Doubling backoff from `initial` up to `max`, no jitter, no cap.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        ReconnectPolicy::Exponential {
            initial,
            max,
            multiplier: 2.0,
            jitter: false,
            max_attempts: None,
        }
    }

    /// The admin activity feed's schedule: 0.5s, 1s, 2s, 4s, 8s, then give up.
    pub fn admin_feed() -> Self {
        Self::exponential(Duration::from_millis(500), Duration::from_secs(10)).with_max_attempts(5)
    }

    /// Set the growth factor. No effect on a fixed policy.
    pub fn with_multiplier(mut self, value: f64) -> Self {
        if let ReconnectPolicy::Exponential { multiplier, .. } = &mut self {
            *multiplier = value;
        }
        self
    }

    /// Enable or disable jitter. No effect on a fixed policy.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        if let ReconnectPolicy::Exponential { jitter, .. } = &mut self {
            *jitter = enabled;
        }
        self
    }

    /// Cap the number of attempts. No effect on a fixed policy.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        if let ReconnectPolicy::Exponential { max_attempts, .. } = &mut self {
            *max_attempts = Some(attempts);
        }
        self
    }

    /// Delay before reconnect attempt number `attempt` (starting at 1).
    ///
    /// Returns `None` once the policy has given up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Fixed { interval } => Some(*interval),
            ReconnectPolicy::Exponential {
                initial,
                max,
                multiplier,
                jitter,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|cap| attempt > cap) {
                    return None;
                }

                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let scaled = initial.as_secs_f64() * multiplier.powi(exponent);
                let capped = if scaled.is_finite() {
                    scaled.min(max.as_secs_f64())
                } else {
                    max.as_secs_f64()
                };
                let delay = Duration::from_secs_f64(capped.max(0.0));

                if *jitter {
                    let half = delay / 2;
                    let spread = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
                    Some(half + Duration::from_millis(spread))
                } else {
                    Some(delay)
                }
            }
        }
    }
}
