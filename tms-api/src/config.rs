//! API Configuration Module
//!
//! Settings for the HTTP ingress, the sequence and email services and the
//! background queue job. Everything is loaded from environment variables with
//! defaults suitable for local development.

use crate::constants::*;
use std::str::FromStr;
use std::time::Duration;
use tms_core::{ConfigError, Encryptor};
use tms_storage::{RetryPolicy, SessionPolicy};

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| match s.to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        })
        .unwrap_or(default)
}

fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(name) {
        Ok(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Top-level configuration for the server binary.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `production` enables the strict checks (required encryption key).
    pub environment: String,

    /// Allowed CORS origins. Empty means allow all (dev mode).
    pub cors_origins: Vec<String>,

    pub session: SessionCookieConfig,
    pub rate_limit: RateLimitConfig,
    pub request_log: RequestLogConfig,
    pub encryption: EncryptionConfig,
    pub email_queue: EmailQueueConfig,
    pub sequence: SequenceConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            cors_origins: Vec::new(),
            session: SessionCookieConfig::default(),
            rate_limit: RateLimitConfig::default(),
            request_log: RequestLogConfig::default(),
            encryption: EncryptionConfig::default(),
            email_queue: EmailQueueConfig::default(),
            sequence: SequenceConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Environment variables:
    /// - `TMS_ENV`: `development` (default) or `production`
    /// - `TMS_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - plus every variable read by the nested configs
    pub fn from_env() -> Self {
        Self {
            environment: std::env::var("TMS_ENV").unwrap_or_else(|_| "development".to_string()),
            cors_origins: env_list("TMS_CORS_ORIGINS", &[]),
            session: SessionCookieConfig::from_env(),
            rate_limit: RateLimitConfig::from_env(),
            request_log: RequestLogConfig::from_env(),
            encryption: EncryptionConfig::from_env(),
            email_queue: EmailQueueConfig::from_env(),
            sequence: SequenceConfig::from_env(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Build the column encryptor. Production refuses to start without a key.
    pub fn encryptor(&self) -> Result<Encryptor, ConfigError> {
        match (&self.encryption.key, self.is_production()) {
            (Some(key), _) => Ok(Encryptor::from_passphrase(key)),
            (None, true) => Err(ConfigError::MissingRequired {
                field: "TMS_ENCRYPTION_KEY".to_string(),
            }),
            (None, false) => {
                tracing::warn!("TMS_ENCRYPTION_KEY not set; using the development key");
                Ok(Encryptor::from_passphrase("tms-development-key"))
            }
        }
    }
}

// ============================================================================
// SESSION COOKIE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl FromStr for SameSite {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" => Ok(SameSite::None),
            other => Err(ConfigError::InvalidValue {
                field: "TMS_SESSION_COOKIE_SAME_SITE".to_string(),
                value: other.to_string(),
                reason: "expected Strict, Lax or None".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionCookieConfig {
    pub name: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
    /// Sliding extension applied on each refresh.
    pub idle_timeout: Duration,
    /// Reject sessions used from a different address than recorded.
    pub pin_ip: bool,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            path: DEFAULT_SESSION_COOKIE_PATH.to_string(),
            domain: None,
            secure: true,
            same_site: SameSite::Lax,
            idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS),
            pin_ip: false,
        }
    }
}

impl SessionCookieConfig {
    /// - `TMS_SESSION_COOKIE_NAME` (trenova-session-id)
    /// - `TMS_SESSION_COOKIE_PATH` (/)
    /// - `TMS_SESSION_COOKIE_DOMAIN` (unset)
    /// - `TMS_SESSION_COOKIE_SECURE` (true)
    /// - `TMS_SESSION_COOKIE_SAME_SITE` (Lax)
    /// - `TMS_SESSION_IDLE_TIMEOUT_SECS` (86400)
    /// - `TMS_SESSION_PIN_IP` (false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: std::env::var("TMS_SESSION_COOKIE_NAME").unwrap_or(defaults.name),
            path: std::env::var("TMS_SESSION_COOKIE_PATH").unwrap_or(defaults.path),
            domain: std::env::var("TMS_SESSION_COOKIE_DOMAIN")
                .ok()
                .filter(|d| !d.is_empty()),
            secure: env_bool("TMS_SESSION_COOKIE_SECURE", defaults.secure),
            same_site: env_parse("TMS_SESSION_COOKIE_SAME_SITE", defaults.same_site),
            idle_timeout: Duration::from_secs(env_parse(
                "TMS_SESSION_IDLE_TIMEOUT_SECS",
                DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
            )),
            pin_ip: env_bool("TMS_SESSION_PIN_IP", defaults.pin_ip),
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            idle_timeout: self.idle_timeout,
            pin_ip: self.pin_ip,
        }
    }
}

// ============================================================================
// RATE LIMITING
// ============================================================================

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: i64,
    pub interval: Duration,
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            interval: Duration::from_secs(DEFAULT_RATE_LIMIT_INTERVAL_SECS),
            key_prefix: DEFAULT_RATE_LIMIT_KEY_PREFIX.to_string(),
        }
    }
}

impl RateLimitConfig {
    /// - `TMS_RATE_LIMIT_ENABLED` (true)
    /// - `TMS_RATE_LIMIT_MAX_REQUESTS` (100)
    /// - `TMS_RATE_LIMIT_INTERVAL_SECS` (60)
    /// - `TMS_RATE_LIMIT_KEY_PREFIX` (ratelimit)
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("TMS_RATE_LIMIT_ENABLED", true),
            max_requests: env_parse("TMS_RATE_LIMIT_MAX_REQUESTS", DEFAULT_RATE_LIMIT_MAX_REQUESTS),
            interval: Duration::from_secs(
                env_parse("TMS_RATE_LIMIT_INTERVAL_SECS", DEFAULT_RATE_LIMIT_INTERVAL_SECS).max(1),
            ),
            key_prefix: std::env::var("TMS_RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| DEFAULT_RATE_LIMIT_KEY_PREFIX.to_string()),
        }
    }
}

// ============================================================================
// REQUEST LOGGING
// ============================================================================

#[derive(Debug, Clone)]
pub struct RequestLogConfig {
    /// Path prefixes that are never logged.
    pub exclude_paths: Vec<String>,
    pub slow_threshold: Duration,
    pub log_bodies: bool,
    pub max_body_size: usize,
    /// Lower-case header names copied into the record.
    pub logged_headers: Vec<String>,
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            exclude_paths: DEFAULT_REQUEST_LOG_EXCLUDE_PATHS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            slow_threshold: Duration::from_millis(DEFAULT_REQUEST_LOG_SLOW_MS),
            log_bodies: false,
            max_body_size: DEFAULT_REQUEST_LOG_MAX_BODY,
            logged_headers: DEFAULT_REQUEST_LOG_HEADERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RequestLogConfig {
    /// - `TMS_REQUEST_LOG_EXCLUDE_PATHS` (/health,/metrics)
    /// - `TMS_REQUEST_LOG_SLOW_MS` (500)
    /// - `TMS_REQUEST_LOG_BODIES` (false)
    /// - `TMS_REQUEST_LOG_MAX_BODY` (1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            exclude_paths: env_list(
                "TMS_REQUEST_LOG_EXCLUDE_PATHS",
                DEFAULT_REQUEST_LOG_EXCLUDE_PATHS,
            ),
            slow_threshold: Duration::from_millis(env_parse(
                "TMS_REQUEST_LOG_SLOW_MS",
                DEFAULT_REQUEST_LOG_SLOW_MS,
            )),
            log_bodies: env_bool("TMS_REQUEST_LOG_BODIES", false),
            max_body_size: env_parse("TMS_REQUEST_LOG_MAX_BODY", DEFAULT_REQUEST_LOG_MAX_BODY),
            logged_headers: defaults.logged_headers,
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

// ============================================================================
// ENCRYPTION
// ============================================================================

#[derive(Clone, Default)]
pub struct EncryptionConfig {
    pub key: Option<String>,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl EncryptionConfig {
    /// - `TMS_ENCRYPTION_KEY` (required in production)
    pub fn from_env() -> Self {
        Self {
            key: std::env::var("TMS_ENCRYPTION_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        }
    }
}

// ============================================================================
// EMAIL QUEUE
// ============================================================================

#[derive(Debug, Clone)]
pub struct EmailQueueConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub default_max_retries: i32,
}

impl Default for EmailQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_EMAIL_QUEUE_POLL_SECS),
            batch_size: DEFAULT_EMAIL_QUEUE_BATCH_SIZE,
            default_max_retries: tms_core::email::DEFAULT_MAX_RETRIES,
        }
    }
}

impl EmailQueueConfig {
    /// - `TMS_EMAIL_QUEUE_POLL_SECS` (30)
    /// - `TMS_EMAIL_QUEUE_BATCH_SIZE` (100)
    /// - `TMS_EMAIL_DEFAULT_MAX_RETRIES` (3)
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(
                env_parse("TMS_EMAIL_QUEUE_POLL_SECS", DEFAULT_EMAIL_QUEUE_POLL_SECS).max(1),
            ),
            batch_size: env_parse("TMS_EMAIL_QUEUE_BATCH_SIZE", DEFAULT_EMAIL_QUEUE_BATCH_SIZE),
            default_max_retries: env_parse(
                "TMS_EMAIL_DEFAULT_MAX_RETRIES",
                tms_core::email::DEFAULT_MAX_RETRIES,
            ),
        }
    }

    /// Short poll interval for development and tests.
    pub fn development() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            ..Self::default()
        }
    }
}

// ============================================================================
// SEQUENCES
// ============================================================================

#[derive(Debug, Clone)]
pub struct SequenceConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub format_cache_ttl: Duration,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SEQUENCE_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_SEQUENCE_BASE_DELAY_MS),
            format_cache_ttl: Duration::from_secs(DEFAULT_FORMAT_CACHE_SECS),
        }
    }
}

impl SequenceConfig {
    /// - `TMS_SEQUENCE_MAX_ATTEMPTS` (3)
    /// - `TMS_SEQUENCE_BASE_DELAY_MS` (50)
    /// - `TMS_SEQUENCE_FORMAT_CACHE_SECS` (900)
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_parse("TMS_SEQUENCE_MAX_ATTEMPTS", DEFAULT_SEQUENCE_MAX_ATTEMPTS)
                .max(1),
            base_delay: Duration::from_millis(env_parse(
                "TMS_SEQUENCE_BASE_DELAY_MS",
                DEFAULT_SEQUENCE_BASE_DELAY_MS,
            )),
            format_cache_ttl: Duration::from_secs(env_parse(
                "TMS_SEQUENCE_FORMAT_CACHE_SECS",
                DEFAULT_FORMAT_CACHE_SECS,
            )),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
