//! Fixed-window rate limiting over a shared counter cache.
//!
//! Each `(method, path, ip, user)` key owns one window in the cache. The
//! cache opens, counts and closes windows atomically per key.

use super::auth::AuthContext;
use super::client_ip::request_ip;
use crate::config::RateLimitConfig;
use crate::error::ApiError;
use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tms_core::{unix_now, TmsResult};
use tms_storage::RateLimitCache;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

// ============================================================================
// STATE
// ============================================================================

#[derive(Clone)]
pub struct RateLimitState {
    cache: Arc<dyn RateLimitCache>,
    config: Arc<RateLimitConfig>,
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    /// Unix time at which the current window ends.
    pub reset: i64,
}

impl RateDecision {
    fn write_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            (LIMIT_HEADER, self.limit),
            (REMAINING_HEADER, self.remaining),
            (RESET_HEADER, self.reset),
        ] {
            if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
                headers.insert(name, v);
            }
        }
    }
}

impl RateLimitState {
    pub fn new(cache: Arc<dyn RateLimitCache>, config: RateLimitConfig) -> Self {
        Self {
            cache,
            config: Arc::new(config),
        }
    }

    /// Cache key for a request.
    pub fn key(&self, method: &str, path: &str, ip: &str, user: Option<&str>) -> String {
        let mut key = format!(
            "{}:{}:{}:{}",
            self.config.key_prefix,
            method,
            path.trim_matches('/'),
            ip
        );
        if let Some(user) = user.filter(|u| !u.is_empty()) {
            key.push(':');
            key.push_str(user);
        }
        key
    }

    /// Count one request against `key` at `now`.
    pub async fn check(&self, key: &str, now: i64) -> TmsResult<RateDecision> {
        let interval = self.config.interval;
        let limit = self.config.max_requests;
        let hit = self.cache.hit(key, now, interval, limit).await?;
        let reset = hit.window_start + interval.as_secs().max(1) as i64;

        Ok(RateDecision {
            allowed: hit.allowed,
            limit,
            remaining: if hit.allowed { (limit - hit.count).max(0) } else { 0 },
            reset,
        })
    }
}

// ============================================================================
// ERROR
// ============================================================================

/// 429 response carrying the window headers and `Retry-After`.
#[derive(Debug)]
pub struct RateLimitError {
    pub decision: RateDecision,
    pub retry_after: i64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let error = ApiError::too_many_requests(
            self.decision.limit,
            self.decision.reset,
            self.retry_after,
        );
        let mut response = error.into_response();
        let headers = response.headers_mut();
        self.decision.write_headers(headers);
        headers.insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from_str(&self.retry_after.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60")),
        );
        response
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Enforce the per-key request budget.
///
/// Cache failures are logged and the request is allowed through.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.config.enabled {
        return Ok(next.run(request).await);
    }

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let ip = request_ip(&request);
    let user = request
        .extensions()
        .get::<AuthContext>()
        .map(|a| a.user_id().to_string());
    let key = state.key(request.method().as_str(), &path, &ip, user.as_deref());

    let now = unix_now();
    let decision = match state.check(&key, now).await {
        Ok(decision) => decision,
        Err(err) => {
            tracing::error!(key = %key, error = %err, "rate limit check failed");
            return Ok(next.run(request).await);
        }
    };

    if !decision.allowed {
        tracing::warn!(ip = %ip, path = %path, limit = decision.limit, "rate limit exceeded");
        return Err(RateLimitError {
            decision,
            retry_after: (decision.reset - now).max(1),
        });
    }

    let mut response = next.run(request).await;
    decision.write_headers(response.headers_mut());
    Ok(response)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use std::time::Duration;
    use tms_storage::InMemoryCache;
    use tower::ServiceExt;

    fn state(cache: Arc<InMemoryCache>, max_requests: i64) -> RateLimitState {
        RateLimitState::new(
            cache,
            RateLimitConfig {
                max_requests,
                interval: Duration::from_secs(60),
                ..Default::default()
            },
        )
    }

    fn app(state: RateLimitState) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
    }

    fn request() -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/ping")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    }

    fn header(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    #[test]
    fn test_key_layout() {
        let s = state(Arc::new(InMemoryCache::new()), 1);
        assert_eq!(s.key("GET", "/api/v1/ping/", "1.2.3.4", None), "ratelimit:GET:api/v1/ping:1.2.3.4");
        assert_eq!(
            s.key("POST", "/x", "1.2.3.4", Some("usr_1")),
            "ratelimit:POST:x:1.2.3.4:usr_1"
        );
    }

    #[tokio::test]
    async fn test_window_counts_and_resets() {
        let s = state(Arc::new(InMemoryCache::new()), 2);
        let now = 1_700_000_000;

        let first = s.check("k", now).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.reset, now + 60);

        assert!(s.check("k", now + 1).await.unwrap().allowed);
        let denied = s.check("k", now + 2).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);

        let fresh = s.check("k", now + 60).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.reset, now + 120);
    }

    /// Yields before touching the cache, as a networked store would.
    struct SlowCache(InMemoryCache);

    #[async_trait::async_trait]
    impl RateLimitCache for SlowCache {
        async fn hit(
            &self,
            key: &str,
            now: i64,
            interval: Duration,
            limit: i64,
        ) -> TmsResult<tms_storage::WindowHit> {
            tokio::task::yield_now().await;
            self.0.hit(key, now, interval, limit).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_never_exceed_limit() {
        for round in 0..20 {
            let s = RateLimitState::new(
                Arc::new(SlowCache(InMemoryCache::new())),
                RateLimitConfig {
                    max_requests: 3,
                    interval: Duration::from_secs(60),
                    ..Default::default()
                },
            );
            let now = 1_700_000_000;

            let tasks: Vec<_> = (0..50)
                .map(|_| {
                    let s = s.clone();
                    tokio::spawn(async move { s.check("k", now).await.unwrap() })
                })
                .collect();

            let mut allowed = Vec::new();
            for task in tasks {
                let decision = task.await.unwrap();
                if decision.allowed {
                    allowed.push(decision.remaining);
                }
            }
            assert_eq!(allowed.len(), 3, "round {round}");
            allowed.sort_unstable();
            assert_eq!(allowed, vec![0, 1, 2], "round {round}");
        }
    }

    #[tokio::test]
    async fn test_headers_and_429() {
        let app = app(state(Arc::new(InMemoryCache::new()), 1));

        let ok = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(header(&ok, "x-ratelimit-limit").as_deref(), Some("1"));
        assert_eq!(header(&ok, "x-ratelimit-remaining").as_deref(), Some("0"));
        assert!(header(&ok, "x-ratelimit-reset").is_some());

        let limited = app.oneshot(request()).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(header(&limited, "retry-after").is_some());
        let body = axum::body::to_bytes(limited.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "TOO_MANY_REQUESTS");
        assert_eq!(json["details"]["limit"], 1);
        assert_eq!(json["details"]["remaining"], 0);
    }

    #[tokio::test]
    async fn test_cache_failure_fails_open() {
        let cache = Arc::new(InMemoryCache::new());
        cache.set_failing(true);
        let app = app(state(cache, 1));

        for _ in 0..3 {
            let response = app.clone().oneshot(request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(header(&response, "x-ratelimit-limit").is_none());
        }
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let s = RateLimitState::new(
            Arc::new(InMemoryCache::new()),
            RateLimitConfig {
                enabled: false,
                max_requests: 0,
                ..Default::default()
            },
        );
        let response = app(s).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
