// tests/ratelimit/fixed_window_tests.rs

#[cfg(test)]
mod tests {
    use crate::fixtures::{limiter, START_MS};
    use docflow_guard::error::GuardError;
    use docflow_guard::ratelimit::{RateLimitPolicy, RateLimiter};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn tenant_preset_allows_sixty_then_denies() {
        let (limiter, _clock) = limiter();
        let policy = RateLimitPolicy::tenant();

        for n in 1..=60 {
            let decision = assert_ok!(limiter.consume_policy(&policy, "acme"));
            assert!(decision.allowed, "request {} should be allowed", n);
            assert_eq!(decision.count, n);
            assert_eq!(decision.remaining, 60 - n);
        }

        let denied = assert_ok!(limiter.consume_policy(&policy, "acme"));
        assert!(!denied.allowed);
        assert_eq!(denied.count, 61);
        assert_eq!(denied.remaining, 0);
        let retry_after = denied.retry_after_seconds.unwrap();
        assert!(retry_after > 0 && retry_after <= 60);
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        let (limiter, clock) = limiter();

        assert_ok!(limiter.consume("user:u1", 1, 10_000));
        clock.advance(2_500);

        let denied = assert_ok!(limiter.consume("user:u1", 1, 10_000));
        // 7.5s left in the window
        assert_eq!(denied.retry_after_seconds, Some(8));
        assert_eq!(denied.reset_at_ms, START_MS + 10_000);
    }

    #[test]
    fn window_resets_at_boundary() {
        let (limiter, clock) = limiter();

        for _ in 0..3 {
            assert_ok!(limiter.consume("ip:203.0.113.9", 2, 1_000));
        }
        assert_eq!(limiter.get_count("ip:203.0.113.9"), Some(3));

        // One millisecond early: still the old window
        clock.advance(999);
        let still_denied = assert_ok!(limiter.consume("ip:203.0.113.9", 2, 1_000));
        assert!(!still_denied.allowed);
        assert_eq!(still_denied.retry_after_seconds, Some(1));

        // Exactly at reset: a fresh window counting this call
        clock.advance(1);
        let fresh = assert_ok!(limiter.consume("ip:203.0.113.9", 2, 1_000));
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.reset_at_ms, START_MS + 2_000);
    }

    #[test]
    fn keys_are_independent() {
        let (limiter, _clock) = limiter();
        let policy = RateLimitPolicy::user();

        for _ in 0..10 {
            assert_ok!(limiter.consume_policy(&policy, "alice"));
        }
        assert!(!assert_ok!(limiter.consume_policy(&policy, "alice")).allowed);
        assert!(assert_ok!(limiter.consume_policy(&policy, "bob")).allowed);

        assert_eq!(limiter.get_count("user:alice"), Some(11));
        assert_eq!(limiter.get_count("user:bob"), Some(1));
    }

    #[test]
    fn same_identifier_in_different_scopes_is_counted_separately() {
        let (limiter, _clock) = limiter();

        assert_ok!(limiter.consume_policy(&RateLimitPolicy::tenant(), "shared"));
        assert_ok!(limiter.consume_policy(&RateLimitPolicy::ip(), "shared"));

        assert_eq!(limiter.get_count("tenant:shared"), Some(1));
        assert_eq!(limiter.get_count("ip:shared"), Some(1));
        assert_eq!(limiter.window_count(), 2);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let (limiter, _clock) = limiter();

        assert!(matches!(
            assert_err!(limiter.consume("", 10, 1_000)),
            GuardError::InvalidArgument(_)
        ));
        assert_err!(limiter.consume("k", 0, 1_000));
        assert_err!(limiter.consume("k", 10, 0));
        assert_eq!(limiter.window_count(), 0);
    }

    #[test]
    fn concurrent_consumers_never_over_admit() {
        let limiter = Arc::new(RateLimiter::new());
        let threads = 8;
        let per_thread = 50;

        let allowed: u64 = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let limiter = Arc::clone(&limiter);
                    scope.spawn(move || {
                        (0..per_thread)
                            .filter(|_| limiter.consume("tenant:busy", 100, 60_000).unwrap().allowed)
                            .count() as u64
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 100);
        assert_eq!(limiter.get_count("tenant:busy"), Some(threads * per_thread));
    }
}
