//! TMS API - HTTP ingress and services for the TMS backend core
//!
//! Sequence number generation and the transactional email pipeline, served
//! over Axum behind session cookie authentication, rate limiting and a
//! structured access log. Storage is PostgreSQL when configured and the
//! in-memory stores from `tms-storage` otherwise.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod jobs;
pub mod macros;
pub mod middleware;
pub mod pg;
pub mod providers;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::ApiConfig;
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{email_queue_task, EmailQueueMetrics};
pub use middleware::{AuthContext, AuthExtractor};
pub use routes::create_api_router;
pub use services::{EmailService, GenerateRequest, SequenceGenerator};
pub use state::AppState;
