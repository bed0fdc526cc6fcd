//! Tracing subscriber setup.

use crate::error::{ApiError, ApiResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "tms_api=debug,tower_http=info,info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// Anything other than `text`/`pretty` keeps JSON output.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "plain" => Self::Text,
            _ => Self::Json,
        }
    }
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub environment: String,
    /// `TMS_LOG_FORMAT`: `json` (default) or `text`.
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("TMS_SERVICE_NAME")
                .unwrap_or_else(|_| "tms-api".to_string()),
            environment: std::env::var("TMS_ENV").unwrap_or_else(|_| "development".to_string()),
            format: std::env::var("TMS_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Json),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Call once at startup before anything logs.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        environment = %config.environment,
        format = ?config.format,
        "Telemetry initialized"
    );
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" TEXT "), LogFormat::Text);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
        assert_eq!(LogFormat::parse("bogus"), LogFormat::Json);
    }

    #[test]
    fn test_second_init_fails_cleanly() {
        let config = TelemetryConfig {
            service_name: "tms-api-test".to_string(),
            environment: "test".to_string(),
            format: LogFormat::Text,
        };
        let _ = init_tracing(&config);
        let err = init_tracing(&config).unwrap_err();
        assert!(err.message.contains("Failed to init subscriber"));
    }
}
