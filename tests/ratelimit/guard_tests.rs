// tests/ratelimit/guard_tests.rs

#[cfg(test)]
mod tests {
    use crate::fixtures::{headers, limiter};
    use docflow_guard::ratelimit::{
        apply_headers, GuardOutcome, RateLimitBackend, RateLimitGuard, RateLimitPolicy,
    };
    use http::header::RETRY_AFTER;
    use http::{Response, StatusCode};
    use std::sync::Arc;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn allowed_requests_carry_rate_limit_headers() {
        let (limiter, _clock) = limiter();
        let guard = RateLimitGuard::new(limiter, RateLimitPolicy::tenant());
        let request = headers(&[("x-tenant-id", "acme")]);

        let outcome = assert_ok!(guard.check(&request).await);
        let GuardOutcome::Allowed(rate_headers) = outcome else {
            panic!("first request should be allowed");
        };

        let mut response = Response::new("ok".to_string());
        apply_headers(&mut response, rate_headers);
        assert_eq!(response.headers()["x-ratelimit-limit"], "60");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "59");
        assert_eq!(response.headers()["x-ratelimit-reset"], "2023-11-14T22:14:20.000Z");
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn exhausted_policy_short_circuits_with_429() {
        let (limiter, clock) = limiter();
        let policy = RateLimitPolicy::new(Some("upload"), 2, 60_000).unwrap();
        let guard = RateLimitGuard::new(limiter, policy);
        let request = headers(&[("x-user-id", "u-42")]);

        assert!(assert_ok!(guard.check(&request).await).is_allowed());
        assert!(assert_ok!(guard.check(&request).await).is_allowed());

        clock.advance(15_000);
        let GuardOutcome::Limited(response) = assert_ok!(guard.check(&request).await) else {
            panic!("third request should be limited");
        };

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(response.headers()[RETRY_AFTER], "45");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "error": "Too Many Requests",
                "message": "Rate limit exceeded. Please retry after 45 seconds.",
                "retryAfter": 45
            })
        );
    }

    #[tokio::test]
    async fn anonymous_requests_share_one_bucket() {
        let (limiter, _clock) = limiter();
        let policy = RateLimitPolicy::new(Some("ip"), 1, 1_000).unwrap();
        let guard = RateLimitGuard::new(limiter.clone(), policy);

        assert!(assert_ok!(guard.check(&headers(&[])).await).is_allowed());
        assert!(!assert_ok!(guard.check(&headers(&[("x-forwarded-for", "")])).await).is_allowed());
        assert_eq!(limiter.get_count("ip:anonymous"), Some(2));
    }

    #[tokio::test]
    async fn forwarded_for_uses_first_hop() {
        let (limiter, _clock) = limiter();
        let guard = RateLimitGuard::new(limiter.clone(), RateLimitPolicy::ip());

        let request = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1, 10.0.0.2")]);
        assert_ok!(guard.check(&request).await);
        assert_eq!(limiter.get_count("ip:203.0.113.9"), Some(1));
    }

    #[tokio::test]
    async fn guard_accepts_a_trait_object_backend() {
        let (limiter, _clock) = limiter();
        let backend: Arc<dyn RateLimitBackend> = limiter.clone();
        let guard = RateLimitGuard::new(backend, RateLimitPolicy::user());

        for _ in 0..10 {
            assert!(assert_ok!(guard.check_identifier("u-1").await).is_allowed());
        }
        assert!(!assert_ok!(guard.check_identifier("u-1").await).is_allowed());
        assert_eq!(guard.policy().limit, 10);
    }
}
