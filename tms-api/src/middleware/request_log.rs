//! Structured access log with request id propagation.

use super::client_ip::{request_ip, user_agent};
use crate::config::RequestLogConfig;
use crate::constants::REQUEST_ID_HEADER;
use crate::error::ApiError;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RequestLogState {
    config: Arc<RequestLogConfig>,
}

impl RequestLogState {
    pub fn new(config: RequestLogConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/// Human-scaled duration: `812ns`, `4.20µs`, `13.07ms`, `1.50s`.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos < 1_000 {
        format!("{nanos}ns")
    } else if nanos < 1_000_000 {
        format!("{:.2}µs", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

/// Cut `s` to at most `max` bytes on a char boundary, marking the cut.
fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let budget = if max > 3 { max - 3 } else { max };
    let mut end = budget;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Replace an oversized JSON document with a small description of it.
fn truncate_json(s: &str, max: usize) -> Option<String> {
    let parsed: Value = serde_json::from_str(s).ok()?;
    let mut summary = Map::new();
    summary.insert("truncated".into(), json!(true));
    summary.insert(
        "message".into(),
        json!("Content exceeded max length and was truncated"),
    );
    match parsed {
        Value::Object(map) => {
            summary.insert("type".into(), json!("object"));
            let sample: Map<String, Value> = map.into_iter().take(3).collect();
            summary.insert("partial".into(), Value::Object(sample));
        }
        Value::Array(items) => {
            summary.insert("type".into(), json!("array"));
            summary.insert("length".into(), json!(items.len()));
            summary.insert(
                "partial".into(),
                Value::Array(items.into_iter().take(2).collect()),
            );
        }
        _ => {
            summary.insert("type".into(), json!("scalar"));
        }
    }
    let rendered = Value::Object(summary).to_string();
    (rendered.len() <= max).then_some(rendered)
}

pub fn truncate_body(body: &[u8], content_type: &str, max: usize) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= max {
        return text.into_owned();
    }
    if content_type.to_ascii_lowercase().contains("json") {
        if let Some(summary) = truncate_json(&text, max) {
            return summary;
        }
    }
    truncate_str(&text, max)
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn selected_headers(headers: &HeaderMap, names: &[String]) -> BTreeMap<String, String> {
    names
        .iter()
        .filter_map(|name| {
            let value = headers.get(name.as_str())?.to_str().ok()?;
            (!value.is_empty()).then(|| (name.clone(), value.to_string()))
        })
        .collect()
}

fn is_compressed(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("gzip"))
}

async fn buffer(body: Body) -> Result<Bytes, axum::Error> {
    axum::body::to_bytes(body, usize::MAX).await
}

/// Log every request outside the excluded paths.
///
/// The request id comes from `X-Request-Id` when the caller sent one and is
/// otherwise minted here; either way it is echoed on the response. Excluded
/// paths pass straight through without one.
pub async fn request_log_middleware(
    State(state): State<RequestLogState>,
    mut request: Request,
    next: Next,
) -> Response {
    let config = state.config.as_ref();
    let path = request.uri().path().to_string();
    if config.is_excluded(&path) {
        return next.run(request).await;
    }

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    let existing = request
        .headers()
        .get(&request_id_header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let request_id = match existing {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::now_v7().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                request.headers_mut().insert(request_id_header.clone(), value);
            }
            id
        }
    };

    let start = Instant::now();
    let method = request.method().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();
    let ip = request_ip(&request);
    let agent = user_agent(request.headers()).to_string();
    let headers = selected_headers(request.headers(), &config.logged_headers);

    let mut request_body = None;
    if config.log_bodies && !is_compressed(request.headers()) {
        let (parts, body) = request.into_parts();
        let bytes = match buffer(body).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "failed to read request body");
                return ApiError::invalid_input("failed to read request body").into_response();
            }
        };
        request_body = Some(truncate_body(&bytes, content_type(&parts.headers), config.max_body_size));
        request = Request::from_parts(parts, Body::from(bytes));
    }

    let mut response = next.run(request).await;

    let mut response_body = None;
    if config.log_bodies && !is_compressed(response.headers()) {
        let (parts, body) = response.into_parts();
        match buffer(body).await {
            Ok(bytes) => {
                response_body =
                    Some(truncate_body(&bytes, content_type(&parts.headers), config.max_body_size));
                response = Response::from_parts(parts, Body::from(bytes));
            }
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "failed to read response body");
                response = Response::from_parts(parts, Body::empty());
            }
        }
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(request_id_header, value);
    }

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    let latency = format_duration(elapsed);
    let headers = (!headers.is_empty()).then(|| format!("{headers:?}"));

    if elapsed > config.slow_threshold {
        tracing::warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            query = %query,
            status,
            ip = %ip,
            latency = %latency,
            user_agent = %agent,
            headers = headers.as_deref(),
            request_body = request_body.as_deref(),
            response_body = response_body.as_deref(),
            "slow request"
        );
    } else {
        tracing::info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            query = %query,
            status,
            ip = %ip,
            latency = %latency,
            user_agent = %agent,
            headers = headers.as_deref(),
            request_body = request_body.as_deref(),
            response_body = response_body.as_deref(),
            "request completed"
        );
    }

    response
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::{get, post}, Router};
    use tower::ServiceExt;

    fn app(config: RequestLogConfig) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/echo", post(|body: String| async move { body }))
            .layer(middleware::from_fn_with_state(
                RequestLogState::new(config),
                request_log_middleware,
            ))
    }

    #[test]
    fn test_format_duration_units() {
        assert_eq!(format_duration(Duration::from_nanos(812)), "812ns");
        assert_eq!(format_duration(Duration::from_nanos(4_200)), "4.20µs");
        assert_eq!(format_duration(Duration::from_micros(13_070)), "13.07ms");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.50s");
    }

    #[test]
    fn test_truncate_keeps_utf8_boundaries() {
        let out = truncate_body("ééééé".as_bytes(), "text/plain", 6);
        assert_eq!(out, "é...");
        assert_eq!(truncate_body(b"short", "text/plain", 10), "short");
    }

    #[test]
    fn test_truncate_json_summarizes() {
        let body = serde_json::to_vec(&json!([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50]))
            .unwrap();
        let out = truncate_body(&body, "application/json", 130);
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["truncated"], true);
        assert_eq!(v["type"], "array");
        assert_eq!(v["length"], 50);
        assert_eq!(v["partial"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_request_id_is_generated_and_echoed() {
        let response = app(RequestLogConfig::default())
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::from("hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_is_propagated_with_bodies_logged() {
        let config = RequestLogConfig {
            log_bodies: true,
            ..Default::default()
        };
        let response = app(config)
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .header(REQUEST_ID_HEADER, "req-123")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-123");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "payload");
    }

    #[tokio::test]
    async fn test_excluded_path_is_untouched() {
        let response = app(RequestLogConfig::default())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(REQUEST_ID_HEADER).is_none());
    }
}
