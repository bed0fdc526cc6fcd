//! Sequence REST API Routes
//!
//! Number generation for the tenant in the session. The organization and
//! business unit always come from the authenticated context.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tms_core::sequence::{FormatConfig, SequenceKind};
use tms_core::TmsError;

use crate::constants::MAX_SEQUENCE_BATCH;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;
use crate::services::{GenerateRequest, SequenceGenerator};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Optional overrides for a generate call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub format: Option<FormatConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateResponse {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateBatchResponse {
    pub values: Vec<String>,
}

fn parse_kind(raw: &str) -> ApiResult<SequenceKind> {
    raw.parse::<SequenceKind>()
        .map_err(|e| ApiError::from(TmsError::from(e)))
}

fn build_request(auth: &AuthExtractor, kind: SequenceKind, body: GenerateBody) -> GenerateRequest {
    let mut req = GenerateRequest::new(
        kind,
        auth.tenant.organization_id.clone(),
        auth.tenant.business_unit_id.clone(),
    );
    req.time = body.time;
    req.format = body.format;
    if let Some(count) = body.count {
        req.count = count;
    }
    req
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/sequences/{kind}
pub async fn generate(
    State(generator): State<Arc<SequenceGenerator>>,
    auth: AuthExtractor,
    Path(kind): Path<String>,
    body: Option<Json<GenerateBody>>,
) -> ApiResult<Json<GenerateResponse>> {
    let kind = parse_kind(&kind)?;
    let req = build_request(&auth, kind, body.map(|Json(b)| b).unwrap_or_default());
    let value = generator.generate(&req).await?;
    Ok(Json(GenerateResponse { value }))
}

/// POST /api/v1/sequences/{kind}/batch
pub async fn generate_batch(
    State(generator): State<Arc<SequenceGenerator>>,
    auth: AuthExtractor,
    Path(kind): Path<String>,
    Json(body): Json<GenerateBody>,
) -> ApiResult<Json<GenerateBatchResponse>> {
    let kind = parse_kind(&kind)?;
    let req = build_request(&auth, kind, body);
    if req.count > MAX_SEQUENCE_BATCH {
        return Err(ApiError::invalid_input(format!(
            "count must not exceed {}",
            MAX_SEQUENCE_BATCH
        )));
    }
    let values = generator.generate_batch(&req).await?;
    Ok(Json(GenerateBatchResponse { values }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/:kind", post(generate))
        .route("/:kind/batch", post(generate_batch))
        .with_state(state)
}

// ============================================================================
// TESTS
// ============================================================================
