//! Ingress middleware.
//!
//! - `auth`: session cookie authentication and the [`AuthExtractor`]
//! - `rate_limit`: fixed-window limits over a shared counter cache
//! - `request_log`: structured access log and request ids
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/api/v1/email/send", post(handler))
//!     // Innermost: sees the authenticated user for its key
//!     .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
//!     .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
//!     // Outermost: logs rejections from the layers above too
//!     .layer(middleware::from_fn_with_state(log_state, request_log_middleware))
//! ```

mod auth;
pub mod client_ip;
pub mod cookie;
mod rate_limit;
mod request_log;

pub use auth::{auth_middleware, AuthContext, AuthExtractor, AuthMiddlewareError, AuthState};
pub use client_ip::client_ip;
pub use rate_limit::{rate_limit_middleware, RateDecision, RateLimitError, RateLimitState};
pub use request_log::{
    format_duration, request_log_middleware, truncate_body, RequestLogState,
};
