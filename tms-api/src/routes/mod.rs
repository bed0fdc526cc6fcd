//! REST API Routes Module
//!
//! - `/api/v1/sequences/*`: number generation
//! - `/api/v1/email/*`: sending, queue, profiles, templates, events
//! - `/health`: readiness and liveness (public)

pub mod email;
pub mod health;
pub mod sequence;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::constants::{CORS_MAX_AGE_SECS, REQUEST_ID_HEADER};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{
    auth_middleware, rate_limit_middleware, request_log_middleware, AuthState, RateLimitState,
    RequestLogState,
};
use crate::state::AppState;

pub use email::create_router as email_router;
pub use health::create_router as health_router;
pub use sequence::create_router as sequence_router;

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set TMS_CORS_ORIGINS.",
        ));
    }
    if !config.session.secure {
        return Err(ApiError::invalid_input(
            "Session cookie must be Secure in production. Set TMS_SESSION_COOKIE_SECURE=true.",
        ));
    }
    if !config.rate_limit.enabled {
        tracing::warn!("Rate limiting is disabled in production. Set TMS_RATE_LIMIT_ENABLED=true.");
    }
    Ok(())
}

// ============================================================================
// SECURE ROUTER BUILDER
// ============================================================================

/// Builder for the API router with session auth and rate limiting on every
/// `/api/v1` route.
///
/// Health routes are exempt from both.
pub struct SecureRouterBuilder {
    state: AppState,
    api_config: ApiConfig,
    auth_state: AuthState,
    rate_limit_state: RateLimitState,
    request_log_state: RequestLogState,
}

impl SecureRouterBuilder {
    /// In production, refuses configurations that would ship insecure
    /// defaults.
    pub fn new(state: AppState, api_config: ApiConfig) -> ApiResult<Self> {
        if api_config.is_production() {
            validate_api_config_for_production(&api_config)?;
        }

        let auth_state = AuthState::new(state.sessions.clone(), api_config.session.clone());
        let rate_limit_state =
            RateLimitState::new(state.rate_limits.clone(), api_config.rate_limit.clone());
        let request_log_state = RequestLogState::new(api_config.request_log.clone());

        Ok(Self {
            state,
            api_config,
            auth_state,
            rate_limit_state,
            request_log_state,
        })
    }

    fn build_entity_routes(&self) -> Router {
        Router::new()
            .nest("/sequences", sequence::create_router(self.state.clone()))
            .nest("/email", email::create_router(self.state.clone()))
    }

    /// # Middleware Order (outer to inner)
    /// 1. CORS
    /// 2. tower-http trace spans
    /// 3. Request log
    /// 4. Auth (only on /api/v1/*)
    /// 5. Rate limiting (only on /api/v1/*, keyed by the session user)
    pub fn build(self) -> Router {
        let api_routes = self
            .build_entity_routes()
            .layer(from_fn_with_state(
                self.rate_limit_state.clone(),
                rate_limit_middleware,
            ))
            .layer(from_fn_with_state(self.auth_state.clone(), auth_middleware));

        let router = Router::new().nest("/api/v1", api_routes).nest(
            "/health",
            health::create_router(self.state.db.clone(), self.state.start_time),
        );

        let cors = build_cors_layer(&self.api_config);

        router
            .layer(from_fn_with_state(
                self.request_log_state,
                request_log_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Empty origins allow any origin without credentials (development). A
/// configured list allows credentials so the session cookie is sent.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderName::from_static("retry-after"),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .max_age(Duration::from_secs(CORS_MAX_AGE_SECS));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: allowing configured origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
            .allow_headers([
                header::CONTENT_TYPE,
                header::ACCEPT,
                HeaderName::from_static(REQUEST_ID_HEADER),
            ])
            .allow_credentials(true)
    }
}

/// Create the complete API router.
pub fn create_api_router(state: AppState, api_config: &ApiConfig) -> ApiResult<Router> {
    SecureRouterBuilder::new(state, api_config.clone()).map(SecureRouterBuilder::build)
}

// ============================================================================
// TESTS
// ============================================================================
