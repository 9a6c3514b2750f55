// tests/ratelimit/sweep_tests.rs

#[cfg(test)]
mod tests {
    use crate::fixtures::limiter;
    use docflow_guard::ratelimit::{spawn_sweeper, RateLimitBackend, DEFAULT_SWEEP_INTERVAL};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio_test::assert_ok;

    #[test]
    fn sweep_removes_only_expired_windows() {
        let (limiter, clock) = limiter();

        assert_ok!(limiter.consume("short", 5, 1_000));
        assert_ok!(limiter.consume("long", 5, 60_000));
        clock.advance(1_000);

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.window_count(), 1);
        assert_eq!(limiter.get_count("short"), None);
        assert_eq!(limiter.get_count("long"), Some(1));
    }

    #[test]
    fn sweep_then_consume_starts_fresh() {
        let (limiter, clock) = limiter();

        for _ in 0..4 {
            assert_ok!(limiter.consume("k", 3, 1_000));
        }
        clock.advance(5_000);
        limiter.sweep();

        let decision = assert_ok!(limiter.consume("k", 3, 1_000));
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_runs_on_interval_and_stops() {
        let (limiter, clock) = limiter();
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        assert_ok!(limiter.consume("a", 1, 1_000));
        assert_ok!(limiter.consume("b", 1, 1_000));
        clock.advance(2_000);

        let backend: Arc<dyn RateLimitBackend> = limiter.clone();
        let handle = spawn_sweeper(backend, DEFAULT_SWEEP_INTERVAL, shutdown_rx);

        tokio::time::sleep(DEFAULT_SWEEP_INTERVAL - Duration::from_secs(1)).await;
        assert_eq!(limiter.window_count(), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.window_count(), 0);

        shutdown_tx.send(()).unwrap();
        assert_ok!(handle.await);
    }
}
