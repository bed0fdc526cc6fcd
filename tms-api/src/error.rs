//! Error Types for the TMS API
//!
//! This module defines error handling for the HTTP layer:
//! - `ErrorCode` categorizes errors and maps them to HTTP status codes
//! - `ApiError` is the JSON body every failing endpoint returns
//! - `From<TmsError>` classifies domain errors by their taxonomy kind
//!
//! Internal failures are logged in full and masked before they reach the
//! client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tms_core::{ErrorKind, SessionError, StorageError, TmsError};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401, 403)
    // ========================================================================
    /// No session cookie was presented
    Unauthorized,

    /// Session is past its expiry, revoked, or older than the absolute limit
    SessionExpired,

    /// Session cookie names no known session
    SessionNotFound,

    /// Session could not be validated
    InvalidSession,

    /// Authenticated but not permitted
    Forbidden,

    // ========================================================================
    // Client Errors (400)
    // ========================================================================
    ValidationFailed,
    InvalidInput,

    /// Request violates a business rule (cancel a sent email, delete the
    /// default profile, ...)
    BusinessRule,

    // ========================================================================
    // Not Found / Conflict (404, 409)
    // ========================================================================
    EntityNotFound,
    EntityAlreadyExists,
    ConcurrentModification,

    // ========================================================================
    // Throttling (429)
    // ========================================================================
    TooManyRequests,

    // ========================================================================
    // Server Errors (500, 502, 503)
    // ========================================================================
    /// A downstream provider or object store failed
    IntegrationFailed,
    InternalError,
    DatabaseError,
    ServiceUnavailable,
    ConnectionPoolExhausted,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized
            | ErrorCode::SessionExpired
            | ErrorCode::SessionNotFound
            | ErrorCode::InvalidSession => StatusCode::UNAUTHORIZED,

            ErrorCode::Forbidden => StatusCode::FORBIDDEN,

            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::BusinessRule => {
                StatusCode::BAD_REQUEST
            }

            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::EntityAlreadyExists | ErrorCode::ConcurrentModification => {
                StatusCode::CONFLICT
            }

            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::IntegrationFailed => StatusCode::BAD_GATEWAY,

            ErrorCode::ServiceUnavailable | ErrorCode::ConnectionPoolExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::InternalError | ErrorCode::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::SessionExpired => "session expired",
            ErrorCode::SessionNotFound => "session not found",
            ErrorCode::InvalidSession => "invalid session",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::BusinessRule => "Operation not allowed",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::EntityAlreadyExists => "Entity already exists",
            ErrorCode::ConcurrentModification => "Concurrent modification detected",
            ErrorCode::TooManyRequests => "rateLimited",
            ErrorCode::IntegrationFailed => "Upstream provider failed",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::ConnectionPoolExhausted => "Connection pool exhausted",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response: `{"error": ..., "code": ..., "details": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,

    /// Human-readable error message
    #[serde(rename = "error")]
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized() -> Self {
        Self::from_code(ErrorCode::Unauthorized)
    }

    pub fn session_expired() -> Self {
        Self::from_code(ErrorCode::SessionExpired)
    }

    pub fn session_not_found() -> Self {
        Self::from_code(ErrorCode::SessionNotFound)
    }

    pub fn invalid_session() -> Self {
        Self::from_code(ErrorCode::InvalidSession)
    }

    /// 400 for a session cookie that cannot be a session id at all.
    pub fn malformed_session() -> Self {
        Self::new(ErrorCode::InvalidInput, "invalid session")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }

    pub fn too_many_requests(limit: i64, reset: i64, retry_after_secs: i64) -> Self {
        Self::from_code(ErrorCode::TooManyRequests).with_details(json!({
            "limit": limit,
            "remaining": 0,
            "reset": reset,
            "retryAfter": retry_after_secs,
        }))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

fn context_details(err: &TmsError) -> Option<serde_json::Value> {
    let ops = err.operations();
    if ops.is_empty() {
        return None;
    }
    let mut tags = serde_json::Map::new();
    let mut current = err;
    while let TmsError::Context { context, source } = current {
        for (k, v) in &context.tags {
            tags.entry(k.clone())
                .or_insert_with(|| serde_json::Value::String(v.clone()));
        }
        current = source;
    }
    Some(json!({ "operations": ops, "tags": tags }))
}

/// Classify a domain error by its taxonomy kind.
impl From<TmsError> for ApiError {
    fn from(err: TmsError) -> Self {
        let root = err.root();
        match err.kind() {
            ErrorKind::Validation => {
                let details = match root {
                    TmsError::Validation(multi) => json!({ "fields": multi.errors() }),
                    _ => json!({}),
                };
                ApiError::validation_failed(root.to_string()).with_details(details)
            }
            ErrorKind::NotFound => {
                let api = ApiError::not_found(root.to_string());
                match context_details(&err) {
                    Some(d) => api.with_details(d),
                    None => api,
                }
            }
            ErrorKind::Conflict => match root {
                TmsError::Storage(StorageError::Duplicate { .. }) => {
                    ApiError::new(ErrorCode::EntityAlreadyExists, root.to_string())
                }
                _ => {
                    tracing::warn!(error = %err, "sequence allocation conflict surfaced");
                    ApiError::new(ErrorCode::ConcurrentModification, root.to_string())
                }
            },
            ErrorKind::Unauthorized => ApiError::unauthorized(),
            ErrorKind::AuthenticationRequired => match root {
                TmsError::Session(SessionError::Expired | SessionError::NotActive) => {
                    ApiError::session_expired()
                }
                TmsError::Session(SessionError::NotFound) => ApiError::session_not_found(),
                TmsError::Session(_) => ApiError::invalid_session(),
                _ => ApiError::unauthorized(),
            },
            ErrorKind::AuthorizationDenied => ApiError::forbidden(root.to_string()),
            ErrorKind::BusinessRule => ApiError::new(ErrorCode::BusinessRule, root.to_string()),
            ErrorKind::RateLimited => ApiError::from_code(ErrorCode::TooManyRequests),
            ErrorKind::Integration => {
                tracing::warn!(error = %err, "integration failure");
                let api = ApiError::new(ErrorCode::IntegrationFailed, err.to_string());
                match context_details(&err) {
                    Some(d) => api.with_details(d),
                    None => api,
                }
            }
            ErrorKind::Internal => {
                tracing::error!(error = %err, "internal error");
                ApiError::from_code(ErrorCode::InternalError)
            }
        }
    }
}

impl From<tms_template::TemplateError> for ApiError {
    fn from(err: tms_template::TemplateError) -> Self {
        ApiError::from(TmsError::from(err))
    }
}

// ============================================================================
// CONVERSIONS FROM DRIVER ERRORS
// ============================================================================

impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        ApiError::database_error("Database operation failed")
    }
}

impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => ApiError::connection_pool_exhausted(),
            deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Database connection pool is closed")
            }
            _ => ApiError::database_error("Failed to acquire database connection"),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tms_core::{EmailError, ErrorContext, FieldCode, MultiError, ResultExt, SequenceError};

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::SessionExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::BusinessRule.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::EntityNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::TooManyRequests.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::IntegrationFailed.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_serialization_shape() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(ApiError::session_expired())?;
        assert_eq!(json["error"], "session expired");
        assert_eq!(json["code"], "SESSION_EXPIRED");
        assert!(json.get("details").is_none());
        Ok(())
    }

    #[test]
    fn test_validation_details_carry_fields() {
        let mut multi = MultiError::new();
        multi.add("toAddresses", FieldCode::Required, "at least one recipient");
        let api = ApiError::from(TmsError::from(multi));

        assert_eq!(api.code, ErrorCode::ValidationFailed);
        let details = api.details.unwrap_or_default();
        assert_eq!(details["fields"][0]["field"], "toAddresses");
        assert_eq!(details["fields"][0]["code"], "required");
    }

    #[test]
    fn test_session_errors_map_to_distinct_codes() {
        let expired = ApiError::from(TmsError::from(SessionError::NotActive));
        assert_eq!(expired.message, "session expired");
        let missing = ApiError::from(TmsError::from(SessionError::NotFound));
        assert_eq!(missing.code, ErrorCode::SessionNotFound);
        let mismatch = ApiError::from(TmsError::from(SessionError::IpMismatch));
        assert_eq!(mismatch.code, ErrorCode::InvalidSession);
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let api = ApiError::from(TmsError::internal("pg: relation does not exist"));
        assert_eq!(api.code, ErrorCode::InternalError);
        assert!(!api.message.contains("relation"));
    }

    #[test]
    fn test_integration_keeps_tags() {
        let res: Result<(), TmsError> = Err(EmailError::Provider {
            provider_type: "SMTP".to_string(),
            reason: "connection refused".to_string(),
        }
        .into());
        let err = res
            .with_context(|| ErrorContext::new("send email").tag("queueId", "q_1"))
            .unwrap_err();
        let api = ApiError::from(err);

        assert_eq!(api.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(api.message, "send email: connection refused");
        let details = api.details.unwrap_or_default();
        assert_eq!(details["tags"]["queueId"], "q_1");
    }

    #[test]
    fn test_conflicts() {
        let dup = ApiError::from(TmsError::from(StorageError::Duplicate {
            entity: "email template".to_string(),
            reason: "slug taken".to_string(),
        }));
        assert_eq!(dup.code, ErrorCode::EntityAlreadyExists);

        let seq = ApiError::from(TmsError::from(SequenceError::MaxRetriesExceeded {
            attempts: 3,
        }));
        assert_eq!(seq.code, ErrorCode::ConcurrentModification);
    }
}
