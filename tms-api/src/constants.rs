//! Constants for the TMS API
//!
//! Defaults used by the configuration structs and the services. Every value
//! here can be overridden through the environment variable named next to the
//! config field that reads it.

// ============================================================================
// SERVER
// ============================================================================

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;

/// Preflight cache lifetime sent in `Access-Control-Max-Age`.
pub const CORS_MAX_AGE_SECS: u64 = 3600;

// ============================================================================
// SESSION COOKIE
// ============================================================================

pub const DEFAULT_SESSION_COOKIE_NAME: &str = "trenova-session-id";
pub const DEFAULT_SESSION_COOKIE_PATH: &str = "/";

/// Cookie values longer than this are rejected before any lookup.
pub const MAX_SESSION_COOKIE_LEN: usize = 128;

/// Sliding session extension applied on every authenticated request.
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// How far in the past a cleared cookie's `Expires` is set.
pub const CLEARED_COOKIE_AGE_SECS: i64 = 24 * 60 * 60;

// ============================================================================
// RATE LIMITING
// ============================================================================

pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: i64 = 100;
pub const DEFAULT_RATE_LIMIT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_KEY_PREFIX: &str = "ratelimit";

// ============================================================================
// REQUEST LOGGING
// ============================================================================

pub const DEFAULT_REQUEST_LOG_EXCLUDE_PATHS: &[&str] = &["/health", "/metrics"];
pub const DEFAULT_REQUEST_LOG_SLOW_MS: u64 = 500;
pub const DEFAULT_REQUEST_LOG_MAX_BODY: usize = 1024;
pub const DEFAULT_REQUEST_LOG_HEADERS: &[&str] = &["content-type", "x-request-id"];

pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ============================================================================
// EMAIL QUEUE
// ============================================================================

pub const DEFAULT_EMAIL_QUEUE_POLL_SECS: u64 = 30;

/// Upper bound on both the pending and the due-scheduled fetch per cycle.
pub const DEFAULT_EMAIL_QUEUE_BATCH_SIZE: usize = 100;

pub const HEADER_ORGANIZATION_ID: &str = "X-Organization-ID";
pub const HEADER_QUEUE_ID: &str = "X-Queue-ID";

// ============================================================================
// SEQUENCES
// ============================================================================

pub const DEFAULT_SEQUENCE_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_SEQUENCE_BASE_DELAY_MS: u64 = 50;

/// Lifetime of a resolved format configuration in the provider cache.
pub const DEFAULT_FORMAT_CACHE_SECS: u64 = 15 * 60;

/// Largest batch a single generate request may ask for.
pub const MAX_SEQUENCE_BATCH: i64 = 1000;

// ============================================================================
// DATABASE
// ============================================================================

pub const DEFAULT_DB_POOL_SIZE: usize = 16;
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;
