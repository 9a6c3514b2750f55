//! Fixed-window rate limiting and its HTTP surface.

mod backend;
mod clock;
mod guard;
mod key;
mod limiter;
mod policy;
mod sweeper;
mod window;

pub use guard::{
    apply_headers, build_headers, identifier_from_headers, too_many_requests, GuardOutcome,
    RateLimitGuard, ANONYMOUS,
};
pub use backend::RateLimitBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::RateLimitKey;
pub use limiter::{RateLimitDecision, RateLimiter};
pub use policy::{PolicySet, RateLimitPolicy, TimeUnit, IP, TENANT, USER};
pub use sweeper::{spawn_sweeper, DEFAULT_SWEEP_INTERVAL};
pub use window::{Window, MAX_WINDOW_MS};
