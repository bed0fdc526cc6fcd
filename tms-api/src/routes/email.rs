//! Email REST API Routes
//!
//! Sending, queue management, profiles, templates and delivery events.
//! Every handler scopes its work to the organization in the session.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tms_core::email::{EmailProfile, EmailTemplate, LogEvent, SecretField};
use tms_core::{Pulid, TenantContext};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;
use crate::services::email::{
    QueueEmailRequest, SendEmailRequest, SendTemplatedEmailRequest,
};
use crate::services::EmailService;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariablesBody {
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
}

fn parse_id(raw: &str) -> ApiResult<Pulid> {
    raw.parse()
        .map_err(|e: tms_core::PulidError| ApiError::invalid_input(format!("invalid id: {}", e)))
}

/// Secrets never leave the server, not even encrypted.
fn redact(mut profile: EmailProfile) -> EmailProfile {
    for field in SecretField::ALL {
        profile.secret_mut(field).clear();
    }
    profile
}

fn scope_profile(profile: &mut EmailProfile, tenant: &TenantContext) {
    profile.organization_id = tenant.organization_id.clone();
    if profile.business_unit_id.is_nil() {
        profile.business_unit_id = tenant.business_unit_id.clone();
    }
}

fn scope_template(template: &mut EmailTemplate, tenant: &TenantContext) {
    template.organization_id = tenant.organization_id.clone();
    if template.business_unit_id.is_nil() {
        template.business_unit_id = tenant.business_unit_id.clone();
    }
}

// ============================================================================
// SENDING AND QUEUE
// ============================================================================

/// POST /api/v1/email/send
pub async fn send_email(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Json(req): Json<SendEmailRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = email.send_email(&auth.tenant, req).await?;
    Ok(Json(response))
}

/// POST /api/v1/email/send-templated
pub async fn send_templated_email(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Json(req): Json<SendTemplatedEmailRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = email.send_templated_email(&auth.tenant, req).await?;
    Ok(Json(response))
}

/// POST /api/v1/email/queue
pub async fn queue_email(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Json(req): Json<QueueEmailRequest>,
) -> ApiResult<impl IntoResponse> {
    let item = email.queue_email(&auth.tenant, req).await?;
    Ok((StatusCode::ACCEPTED, Json(item)))
}

/// POST /api/v1/email/process - run one queue pass now.
pub async fn process_queue(
    State(email): State<Arc<EmailService>>,
    _auth: AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let stats = email.process_email_queue().await?;
    Ok(Json(stats))
}

/// GET /api/v1/email/queue/{id}
pub async fn get_status(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = email.get_email_status(&auth.tenant, &parse_id(&id)?).await?;
    Ok(Json(status))
}

/// POST /api/v1/email/queue/{id}/retry
pub async fn retry_email(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let item = email.retry_failed_email(&auth.tenant, &parse_id(&id)?).await?;
    Ok(Json(item))
}

/// POST /api/v1/email/queue/{id}/cancel
pub async fn cancel_email(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let item = email.cancel_scheduled_email(&auth.tenant, &parse_id(&id)?).await?;
    Ok(Json(item))
}

/// POST /api/v1/email/events
pub async fn log_event(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Json(event): Json<LogEvent>,
) -> ApiResult<impl IntoResponse> {
    let log = email.log_email_event(&auth.tenant, event).await?;
    Ok(Json(log))
}

// ============================================================================
// PROFILES
// ============================================================================

pub async fn create_profile(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Json(mut profile): Json<EmailProfile>,
) -> ApiResult<impl IntoResponse> {
    scope_profile(&mut profile, &auth.tenant);
    profile.id = Pulid::default();
    let created = email.profiles().create(profile).await?;
    Ok((StatusCode::CREATED, Json(redact(created))))
}

pub async fn list_profiles(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let profiles = email.profiles().list(&auth.tenant.organization_id).await?;
    Ok(Json(profiles.into_iter().map(redact).collect::<Vec<_>>()))
}

pub async fn get_profile(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let profile = email
        .profiles()
        .get(&parse_id(&id)?, &auth.tenant.organization_id)
        .await?;
    Ok(Json(redact(profile)))
}

/// Empty secret fields keep the stored values.
pub async fn update_profile(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
    Json(mut profile): Json<EmailProfile>,
) -> ApiResult<impl IntoResponse> {
    scope_profile(&mut profile, &auth.tenant);
    profile.id = parse_id(&id)?;
    let updated = email.profiles().update(profile).await?;
    Ok(Json(redact(updated)))
}

pub async fn delete_profile(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    email
        .profiles()
        .delete(&parse_id(&id)?, &auth.tenant.organization_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/email/profiles/{id}/test
pub async fn test_profile(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let result = email.test_email_profile(&auth.tenant, &parse_id(&id)?).await?;
    Ok(Json(result))
}

/// POST /api/v1/email/profiles/{id}/default
pub async fn set_default_profile(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let profile = email
        .profiles()
        .set_default(&parse_id(&id)?, &auth.tenant.organization_id)
        .await?;
    Ok(Json(redact(profile)))
}

// ============================================================================
// TEMPLATES
// ============================================================================

pub async fn create_template(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Json(mut template): Json<EmailTemplate>,
) -> ApiResult<impl IntoResponse> {
    scope_template(&mut template, &auth.tenant);
    template.id = Pulid::default();
    let created = email.templates().create(template).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_templates(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let templates = email.templates().list(&auth.tenant.organization_id).await?;
    Ok(Json(templates))
}

pub async fn get_template(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let template = email
        .templates()
        .get(&parse_id(&id)?, &auth.tenant.organization_id)
        .await?;
    Ok(Json(template))
}

pub async fn update_template(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
    Json(mut template): Json<EmailTemplate>,
) -> ApiResult<impl IntoResponse> {
    scope_template(&mut template, &auth.tenant);
    template.id = parse_id(&id)?;
    let updated = email.templates().update(template).await?;
    Ok(Json(updated))
}

pub async fn delete_template(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    email
        .templates()
        .delete(&parse_id(&id)?, &auth.tenant.organization_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/email/templates/{id}/preview - sample data when no
/// variables are given.
pub async fn preview_template(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
    body: Option<Json<VariablesBody>>,
) -> ApiResult<impl IntoResponse> {
    let vars = body.and_then(|Json(b)| b.variables);
    let rendered = email
        .templates()
        .preview(&parse_id(&id)?, &auth.tenant.organization_id, vars)
        .await?;
    Ok(Json(rendered))
}

/// POST /api/v1/email/templates/{id}/validate
pub async fn validate_template(
    State(email): State<Arc<EmailService>>,
    auth: AuthExtractor,
    Path(id): Path<String>,
    Json(body): Json<VariablesBody>,
) -> ApiResult<impl IntoResponse> {
    email
        .templates()
        .validate_variables(
            &parse_id(&id)?,
            &auth.tenant.organization_id,
            &body.variables.unwrap_or_default(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "valid": true })))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    let profiles = Router::new()
        .route("/", post(create_profile).get(list_profiles))
        .route(
            "/:id",
            get(get_profile).put(update_profile).delete(delete_profile),
        )
        .route("/:id/test", post(test_profile))
        .route("/:id/default", post(set_default_profile));

    let templates = Router::new()
        .route("/", post(create_template).get(list_templates))
        .route(
            "/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/:id/preview", post(preview_template))
        .route("/:id/validate", post(validate_template));

    Router::new()
        .route("/send", post(send_email))
        .route("/send-templated", post(send_templated_email))
        .route("/queue", post(queue_email))
        .route("/process", post(process_queue))
        .route("/queue/:id", get(get_status))
        .route("/queue/:id/retry", post(retry_email))
        .route("/queue/:id/cancel", post(cancel_email))
        .route("/events", post(log_event))
        .nest("/profiles", profiles)
        .nest("/templates", templates)
        .with_state(state)
}

// ============================================================================
// TESTS
// ============================================================================
