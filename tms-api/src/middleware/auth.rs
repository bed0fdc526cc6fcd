//! Session cookie authentication.
//!
//! The middleware resolves the session cookie through a [`SessionService`],
//! enforces the absolute session age, and stamps an [`AuthContext`] into the
//! request extensions for handlers and the rate limiter.

use super::client_ip::{request_ip, user_agent};
use super::cookie::{clear_session_cookie, read_cookie, session_cookie};
use crate::config::SessionCookieConfig;
use crate::constants::MAX_SESSION_COOKIE_LEN;
use crate::error::ApiError;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tms_core::{unix_now, Pulid, Session, SessionError, TenantContext};
use tms_storage::SessionService;

// ============================================================================
// AUTH CONTEXT
// ============================================================================

/// Identity of an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub session_id: Pulid,
    pub tenant: TenantContext,
}

impl AuthContext {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            tenant: TenantContext::new(
                session.organization_id.clone(),
                session.business_unit_id.clone(),
                session.user_id.clone(),
            ),
        }
    }

    pub fn user_id(&self) -> &Pulid {
        &self.tenant.user_id
    }
}

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

#[derive(Clone)]
pub struct AuthState {
    pub sessions: Arc<dyn SessionService>,
    pub cookie: Arc<SessionCookieConfig>,
}

impl AuthState {
    pub fn new(sessions: Arc<dyn SessionService>, cookie: SessionCookieConfig) -> Self {
        Self {
            sessions,
            cookie: Arc::new(cookie),
        }
    }
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Rejection from [`auth_middleware`], optionally telling the browser to
/// drop its session cookie.
#[derive(Debug)]
pub struct AuthMiddlewareError {
    pub error: ApiError,
    pub clear_cookie: Option<String>,
}

impl AuthMiddlewareError {
    fn new(error: ApiError) -> Self {
        Self {
            error,
            clear_cookie: None,
        }
    }

    fn clearing(error: ApiError, config: &SessionCookieConfig) -> Self {
        Self {
            error,
            clear_cookie: Some(clear_session_cookie(config)),
        }
    }

    fn from_session_error(err: SessionError, config: &SessionCookieConfig) -> Self {
        match err {
            SessionError::Expired | SessionError::NotActive => {
                Self::clearing(ApiError::session_expired(), config)
            }
            SessionError::NotFound => Self::clearing(ApiError::session_not_found(), config),
            SessionError::IpMismatch => Self::new(ApiError::invalid_session()),
            SessionError::Storage { reason } => {
                tracing::error!(error = %reason, "session lookup failed");
                Self::new(ApiError::invalid_session())
            }
        }
    }
}

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        let mut response = self.error.into_response();
        if let Some(value) = self
            .clear_cookie
            .and_then(|c| HeaderValue::from_str(&c).ok())
        {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        response
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Authenticate the session cookie and refresh the session.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/v1/email/send", post(send))
///     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let config = state.cookie.as_ref();

    let raw = read_cookie(request.headers(), &config.name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthMiddlewareError::new(ApiError::unauthorized()))?;
    if raw.len() > MAX_SESSION_COOKIE_LEN {
        return Err(AuthMiddlewareError::new(ApiError::malformed_session()));
    }
    let session_id: Pulid = raw
        .parse()
        .map_err(|_| AuthMiddlewareError::new(ApiError::malformed_session()))?;

    let ip = request_ip(&request);
    let agent = user_agent(request.headers()).to_string();

    let session = state
        .sessions
        .refresh_session(&session_id, &ip, &agent)
        .await
        .map_err(|e| {
            tracing::debug!(session_id = %session_id, error = %e, "session rejected");
            AuthMiddlewareError::from_session_error(e, config)
        })?;

    if !session.is_within_max_age(unix_now()) {
        tracing::debug!(session_id = %session.id, "session past maximum age");
        return Err(AuthMiddlewareError::clearing(ApiError::session_expired(), config));
    }

    let auth = AuthContext::from_session(&session);
    request.extensions_mut().insert(auth.tenant.clone());
    request.extensions_mut().insert(auth);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&session_cookie(
        config,
        session.id.as_str(),
        session.expires_at,
    )) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Handler argument for the authenticated identity.
///
/// Requires [`auth_middleware`] on the route; without it extraction fails
/// with a 500.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                ApiError::internal_error(
                    "AuthContext not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                )
            })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tms_core::SessionStatus;
    use tms_storage::{InMemorySessionStore, SessionPolicy};
    use tower::ServiceExt;

    fn session(created_at: i64, expires_at: i64) -> Session {
        Session {
            id: Pulid::new("sess"),
            user_id: Pulid::new("usr"),
            organization_id: Pulid::new("org"),
            business_unit_id: Pulid::new("bu"),
            created_at,
            expires_at,
            last_active_at: created_at,
            ip_address: String::new(),
            user_agent: String::new(),
            status: SessionStatus::Active,
        }
    }

    async fn whoami(AuthExtractor(auth): AuthExtractor) -> String {
        auth.tenant.organization_id.to_string()
    }

    fn app(store: Arc<InMemorySessionStore>) -> Router {
        let state = AuthState::new(store, SessionCookieConfig::default());
        Router::new()
            .route("/me", get(whoami))
            .layer(middleware::from_fn_with_state(state, auth_middleware))
    }

    fn request(cookie: Option<&str>) -> Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/me");
        if let Some(c) = cookie {
            builder = builder.header(header::COOKIE, format!("trenova-session-id={c}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn error_code(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["code"].as_str().unwrap_or_default().to_string()
    }

    fn clears_cookie(response: &Response) -> bool {
        response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("trenova-session-id=;"))
    }

    #[tokio::test]
    async fn test_valid_session_reaches_handler() {
        let store = Arc::new(InMemorySessionStore::new(SessionPolicy::default()));
        let now = unix_now();
        let s = session(now - 60, now + 60);
        store.insert(s.clone());

        let response = app(store).oneshot(request(Some(s.id.as_str()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_some());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, s.organization_id.as_str().as_bytes());
    }

    #[tokio::test]
    async fn test_missing_cookie_is_unauthorized() {
        let store = Arc::new(InMemorySessionStore::default());
        let response = app(store).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_oversized_cookie_is_bad_request() {
        let store = Arc::new(InMemorySessionStore::default());
        let long = "a".repeat(MAX_SESSION_COOKIE_LEN + 1);
        let response = app(store).oneshot(request(Some(&long))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_unknown_session_clears_cookie() {
        let store = Arc::new(InMemorySessionStore::default());
        let id = Pulid::new("sess");
        let response = app(store).oneshot(request(Some(id.as_str()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(clears_cookie(&response));
        assert_eq!(error_code(response).await, "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_expired_session_clears_cookie() {
        let store = Arc::new(InMemorySessionStore::default());
        let now = unix_now();
        let s = session(now - 600, now - 1);
        store.insert(s.clone());

        let response = app(store).oneshot(request(Some(s.id.as_str()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(clears_cookie(&response));
        assert_eq!(error_code(response).await, "SESSION_EXPIRED");
    }

    #[tokio::test]
    async fn test_session_past_max_age_is_rejected() {
        let store = Arc::new(InMemorySessionStore::default());
        let now = unix_now();
        let s = session(now - 73 * 3600, now + 3600);
        store.insert(s.clone());

        let response = app(store).oneshot(request(Some(s.id.as_str()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(clears_cookie(&response));
    }

    #[tokio::test]
    async fn test_extractor_without_middleware_is_500() {
        let app = Router::new().route("/me", get(whoami));
        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
