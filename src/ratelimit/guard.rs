//! HTTP surface of the rate limiter: headers, 429 responses and the
//! per-route guard.

use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, Response, StatusCode};
use serde_json::json;
use tracing::{debug, instrument};

use super::backend::RateLimitBackend;
use super::limiter::RateLimitDecision;
use super::policy::RateLimitPolicy;
use crate::error::Result;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Identifier used when a request carries no identifying header.
pub const ANONYMOUS: &str = "anonymous";

/// Headers to attach to a rate-limited response.
///
/// `X-RateLimit-Reset` is the window end as an ISO-8601 UTC timestamp with
/// millisecond precision. `Retry-After` is only present when denied.
pub fn build_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));

    let reset = decision
        .reset_at()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(X_RATELIMIT_RESET, value);
    }

    if !decision.allowed {
        if let Some(retry_after) = decision.retry_after_seconds {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        }
    }
    headers
}

/// Build the `429 Too Many Requests` JSON response.
pub fn too_many_requests(retry_after: u64, headers: HeaderMap) -> Response<String> {
    let body = json!({
        "error": "Too Many Requests",
        "message": format!("Rate limit exceeded. Please retry after {} seconds.", retry_after),
        "retryAfter": retry_after,
    });

    let mut response = Response::new(body.to_string());
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let response_headers = response.headers_mut();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response_headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response_headers.extend(headers);
    response
}

/// Pick the identifier to rate limit a request by.
///
/// Precedence: `X-User-ID`, `X-Tenant-ID`, `CF-Connecting-IP`, the first
/// entry of `X-Forwarded-For`, then `"anonymous"`. Empty values are skipped.
pub fn identifier_from_headers(headers: &HeaderMap) -> String {
    ["x-user-id", "x-tenant-id", "cf-connecting-ip"]
        .iter()
        .find_map(|name| header_str(headers, name))
        .or_else(|| {
            header_str(headers, "x-forwarded-for")
                .and_then(|forwarded| forwarded.split(',').next())
                .map(str::trim)
                .filter(|first| !first.is_empty())
        })
        .unwrap_or(ANONYMOUS)
        .to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Copy rate limit headers onto a downstream response.
pub fn apply_headers<T>(response: &mut Response<T>, headers: HeaderMap) {
    response.headers_mut().extend(headers);
}

/// Result of running a request through a [`RateLimitGuard`].
#[derive(Debug)]
pub enum GuardOutcome {
    /// Let the request through and attach these headers to its response.
    Allowed(HeaderMap),
    /// Reply with this 429 instead of calling the handler.
    Limited(Response<String>),
}

impl GuardOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardOutcome::Allowed(_))
    }
}

/// Applies one policy to incoming requests.
pub struct RateLimitGuard<B: RateLimitBackend + ?Sized> {
    backend: Arc<B>,
    policy: RateLimitPolicy,
}

impl<B: RateLimitBackend + ?Sized> RateLimitGuard<B> {
    /// Create a guard enforcing `policy` against `backend`.
    pub fn new(backend: Arc<B>, policy: RateLimitPolicy) -> Self {
        Self { backend, policy }
    }

    /// The policy this guard enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Check a request by its headers.
    pub async fn check(&self, headers: &HeaderMap) -> Result<GuardOutcome> {
        let identifier = identifier_from_headers(headers);
        self.check_identifier(&identifier).await
    }

    /// Check a request whose identifier is already known.
    #[instrument(skip(self), fields(scope = ?self.policy.scope, limit = self.policy.limit))]
    pub async fn check_identifier(&self, identifier: &str) -> Result<GuardOutcome> {
        let key = self.policy.key_for(identifier);
        let decision = self
            .backend
            .consume(&key.to_string_key(), self.policy.limit, self.policy.window_ms)
            .await?;
        let headers = build_headers(&decision);

        match decision.retry_after_seconds {
            Some(retry_after) if !decision.allowed => {
                debug!(key = %key, retry_after = retry_after, "Request rate limited");
                Ok(GuardOutcome::Limited(too_many_requests(retry_after, headers)))
            }
            _ => Ok(GuardOutcome::Allowed(headers)),
        }
    }
}
