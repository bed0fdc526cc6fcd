//! Email service facade used by the HTTP routes and the queue job.

use super::builder::MessageBuilder;
use super::processor::{ProcessStats, QueueProcessor};
use super::profile::ProfileService;
use super::sender::EmailSender;
use super::template::TemplateService;
use crate::config::EmailQueueConfig;
use crate::providers::ProviderRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tms_core::email::{
    AttachmentMeta, AttachmentPayload, EmailLog, EmailProfile, LogEvent, Metadata, Priority,
    QueueItem, QueueStatus, META_ORGANIZATION_ID, META_QUEUE_ID,
};
use tms_core::pulid::prefix;
use tms_core::{
    unix_now, EmailError, Encryptor, ErrorContext, Pulid, ResultExt, TenantContext, TmsResult,
};
use tms_storage::{
    AttachmentHandler, InMemoryEmailStore, LogRepository, ProfileRepository, QueueRepository,
    TemplateRepository,
};

// ============================================================================
// REQUESTS AND RESPONSES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    /// Profile to send with; the organization default when absent.
    #[serde(default)]
    pub profile_id: Option<Pulid>,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub html_body: String,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTemplatedEmailRequest {
    pub template_id: Pulid,
    #[serde(default)]
    pub profile_id: Option<Pulid>,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEmailRequest {
    #[serde(flatten)]
    pub email: SendEmailRequest,
    /// Unix seconds; a future time queues the email as Scheduled.
    #[serde(default)]
    pub scheduled_at: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailResponse {
    pub queue_id: Pulid,
    pub message_id: String,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailStatusResponse {
    pub queue_id: Pulid,
    pub status: QueueStatus,
    pub sent_at: Option<i64>,
    pub scheduled_at: Option<i64>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub log: Option<EmailLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProfileResponse {
    pub success: bool,
    pub message: String,
    pub details: Value,
}

// ============================================================================
// STORES
// ============================================================================

/// Repositories backing the email pipeline.
#[derive(Clone)]
pub struct EmailStores {
    pub profiles: Arc<dyn ProfileRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub queue: Arc<dyn QueueRepository>,
    pub logs: Arc<dyn LogRepository>,
}

impl EmailStores {
    /// Every repository served by one store, e.g. [`InMemoryEmailStore`] or
    /// the PostgreSQL store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ProfileRepository + TemplateRepository + QueueRepository + LogRepository + 'static,
    {
        Self {
            profiles: store.clone(),
            templates: store.clone(),
            queue: store.clone(),
            logs: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::shared(Arc::new(InMemoryEmailStore::new()))
    }
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Clone)]
pub struct EmailService {
    profiles: ProfileService,
    templates: TemplateService,
    queue: Arc<dyn QueueRepository>,
    logs: Arc<dyn LogRepository>,
    attachments: Arc<dyn AttachmentHandler>,
    sender: EmailSender,
    processor: QueueProcessor,
    default_max_retries: i32,
}

impl EmailService {
    pub fn new(
        stores: EmailStores,
        attachments: Arc<dyn AttachmentHandler>,
        registry: Arc<ProviderRegistry>,
        encryptor: Arc<Encryptor>,
        config: &EmailQueueConfig,
    ) -> Self {
        let sender = EmailSender::new(registry, encryptor.clone());
        let processor = QueueProcessor::new(
            stores.queue.clone(),
            stores.logs.clone(),
            stores.profiles.clone(),
            MessageBuilder::new(attachments.clone()),
            sender.clone(),
            config.batch_size,
        );

        Self {
            profiles: ProfileService::new(stores.profiles, encryptor),
            templates: TemplateService::new(stores.templates),
            queue: stores.queue,
            logs: stores.logs,
            attachments,
            sender,
            processor,
            default_max_retries: config.default_max_retries,
        }
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    pub fn processor(&self) -> &QueueProcessor {
        &self.processor
    }

    async fn resolve_profile(
        &self,
        tenant: &TenantContext,
        profile_id: Option<&Pulid>,
    ) -> TmsResult<EmailProfile> {
        match profile_id.filter(|id| !id.is_nil()) {
            Some(id) => self.profiles.get(id, &tenant.organization_id).await,
            None => self.profiles.get_default(&tenant.organization_id).await,
        }
    }

    fn queue_item(
        &self,
        tenant: &TenantContext,
        req: &SendEmailRequest,
        scheduled_at: Option<i64>,
        max_retries: Option<i32>,
    ) -> QueueItem {
        let id = Pulid::new(prefix::EMAIL_QUEUE);
        let mut item = QueueItem::new(
            tenant.organization_id.clone(),
            Pulid::nil(),
            req.to.clone(),
            &req.subject,
        );
        item.business_unit_id = tenant.business_unit_id.clone();
        item.cc_addresses = req.cc.clone();
        item.bcc_addresses = req.bcc.clone();
        item.html_body = req.html_body.clone();
        item.text_body = req.text_body.clone();
        item.priority = req.priority;
        item.scheduled_at = scheduled_at;
        item.status = QueueItem::initial_status(scheduled_at, unix_now());
        item.max_retries = max_retries.unwrap_or(self.default_max_retries);
        item.metadata = req.metadata.clone();
        item.metadata
            .insert(META_ORGANIZATION_ID.to_string(), json!(tenant.organization_id.as_str()));
        item.metadata.insert(META_QUEUE_ID.to_string(), json!(id.as_str()));
        item.id = id;
        item
    }

    /// Store attachments, then the queue row. Stored attachments are removed
    /// again when the row cannot be written.
    async fn create_queue_entry(
        &self,
        tenant: &TenantContext,
        mut item: QueueItem,
        payloads: &[AttachmentPayload],
    ) -> TmsResult<QueueItem> {
        let saved: Vec<AttachmentMeta> = if payloads.is_empty() {
            Vec::new()
        } else {
            self.attachments
                .save(payloads, &tenant.organization_id, &tenant.business_unit_id)
                .await
                .with_context(|| {
                    ErrorContext::new("save attachments").tag("organizationId", &tenant.organization_id)
                })?
        };
        item.attachments = saved.clone();

        match self.queue.create(item).await {
            Ok(created) => {
                tracing::debug!(
                    queue_id = %created.id,
                    status = %created.status,
                    attachments = created.attachments.len(),
                    "email queued"
                );
                Ok(created)
            }
            Err(err) => {
                if !saved.is_empty() {
                    if let Err(cleanup) = self.attachments.delete(&saved, &tenant.organization_id).await {
                        tracing::error!(
                            error = %cleanup,
                            "failed to clean up attachments after queue creation failure"
                        );
                    }
                }
                Err(err).op("create queue entry")
            }
        }
    }

    /// Validate, queue and send immediately.
    pub async fn send_email(
        &self,
        tenant: &TenantContext,
        req: SendEmailRequest,
    ) -> TmsResult<SendEmailResponse> {
        let mut item = self.queue_item(tenant, &req, None, None);
        item.check().into_result().op("validate email request")?;

        let profile = self.resolve_profile(tenant, req.profile_id.as_ref()).await?;
        item.profile_id = profile.id.clone();

        let item = self.create_queue_entry(tenant, item, &req.attachments).await?;
        let queue_id = item.id.clone();
        let ctx = |op: &str| ErrorContext::new(op).tag("queueId", &queue_id);

        self.processor
            .process_single_item(item)
            .await
            .with_context(|| ctx("send immediate"))?;
        let item = self
            .queue
            .get(&queue_id, &tenant.organization_id)
            .await
            .with_context(|| ctx("get queue status"))?;

        tracing::info!(queue_id = %item.id, status = %item.status, "email send finished");
        Ok(SendEmailResponse {
            queue_id: item.id,
            message_id: item.message_id.unwrap_or_default(),
            status: item.status,
        })
    }

    /// Render a stored template with `variables` and send the result.
    pub async fn send_templated_email(
        &self,
        tenant: &TenantContext,
        req: SendTemplatedEmailRequest,
    ) -> TmsResult<SendEmailResponse> {
        let template = self.templates.get(&req.template_id, &tenant.organization_id).await?;
        self.templates
            .check_variables(&template, &req.variables)
            .with_context(|| {
                ErrorContext::new("validate template variables").tag("templateId", &template.id)
            })?;
        let rendered = self
            .templates
            .render(&template, &Value::Object(req.variables))?;

        tracing::info!(
            template_id = %template.id,
            recipients = req.to.len(),
            "sending templated email"
        );
        self.send_email(
            tenant,
            SendEmailRequest {
                profile_id: req.profile_id,
                to: req.to,
                cc: req.cc,
                bcc: req.bcc,
                subject: rendered.subject,
                html_body: rendered.html,
                text_body: Some(rendered.text).filter(|t| !t.is_empty()),
                attachments: req.attachments,
                priority: req.priority,
                metadata: req.metadata,
            },
        )
        .await
    }

    /// Queue for the polling job. Future `scheduledAt` queues as Scheduled.
    pub async fn queue_email(
        &self,
        tenant: &TenantContext,
        req: QueueEmailRequest,
    ) -> TmsResult<QueueItem> {
        let mut item = self.queue_item(tenant, &req.email, req.scheduled_at, req.max_retries);
        item.check().into_result().op("validate email request")?;

        let profile = self.resolve_profile(tenant, req.email.profile_id.as_ref()).await?;
        item.profile_id = profile.id;

        self.create_queue_entry(tenant, item, &req.email.attachments).await
    }

    pub async fn process_email_queue(&self) -> TmsResult<ProcessStats> {
        self.processor.process_queue().await
    }

    /// Connection test. Provider failures are reported in the response body.
    pub async fn test_email_profile(
        &self,
        tenant: &TenantContext,
        profile_id: &Pulid,
    ) -> TmsResult<TestProfileResponse> {
        let profile = self.profiles.get(profile_id, &tenant.organization_id).await?;

        match self.sender.test_connection(&profile).await {
            Ok(()) => {
                tracing::info!(
                    profile_id = %profile.id,
                    provider = %profile.provider_type,
                    host = %profile.host,
                    port = profile.port,
                    "email profile connection test succeeded"
                );
                Ok(TestProfileResponse {
                    success: true,
                    message: "Email profile configuration is valid".to_string(),
                    details: json!({
                        "provider": profile.provider_type,
                        "host": profile.host,
                        "port": profile.port,
                    }),
                })
            }
            Err(err) => {
                let reason = err.root().to_string();
                tracing::warn!(
                    profile_id = %profile.id,
                    provider = %profile.provider_type,
                    host = %profile.host,
                    port = profile.port,
                    error = %err,
                    "email profile connection test failed"
                );
                Ok(TestProfileResponse {
                    success: false,
                    message: format!("Connection test failed: {}", reason),
                    details: json!({
                        "provider": profile.provider_type,
                        "host": profile.host,
                        "port": profile.port,
                        "error": reason,
                    }),
                })
            }
        }
    }

    pub async fn get_email_status(
        &self,
        tenant: &TenantContext,
        queue_id: &Pulid,
    ) -> TmsResult<EmailStatusResponse> {
        let ctx = |op: &str| ErrorContext::new(op).tag("queueId", queue_id);
        let item = self
            .queue
            .get(queue_id, &tenant.organization_id)
            .await
            .with_context(|| ctx("get queue entry"))?;
        let log = self
            .logs
            .get_by_queue_id(queue_id, &tenant.organization_id)
            .await
            .with_context(|| ctx("get email log"))?;

        Ok(EmailStatusResponse {
            queue_id: item.id,
            status: item.status,
            sent_at: item.sent_at,
            scheduled_at: item.scheduled_at,
            error_message: item.error_message,
            retry_count: item.retry_count,
            log,
        })
    }

    /// Put a retryable item back to Pending.
    pub async fn retry_failed_email(&self, tenant: &TenantContext, queue_id: &Pulid) -> TmsResult<QueueItem> {
        let ctx = |op: &str| ErrorContext::new(op).tag("queueId", queue_id);
        let mut item = self
            .queue
            .get(queue_id, &tenant.organization_id)
            .await
            .with_context(|| ctx("get queue entry"))?;

        if !item.can_retry() {
            tracing::warn!(
                queue_id = %queue_id,
                status = %item.status,
                retry_count = item.retry_count,
                "email cannot be retried"
            );
            return Err(EmailError::CannotRetry {
                status: item.status.to_string(),
                retry_count: item.retry_count,
                max_retries: item.max_retries,
            })
            .with_context(|| ctx("check retry eligibility").tag("status", item.status));
        }

        item.status = QueueStatus::Pending;
        item.error_message = None;
        let item = self.queue.update(item).await.with_context(|| ctx("update queue for retry"))?;
        tracing::info!(queue_id = %queue_id, "email queued for retry");
        Ok(item)
    }

    pub async fn cancel_scheduled_email(
        &self,
        tenant: &TenantContext,
        queue_id: &Pulid,
    ) -> TmsResult<QueueItem> {
        let ctx = |op: &str| ErrorContext::new(op).tag("queueId", queue_id);
        let mut item = self
            .queue
            .get(queue_id, &tenant.organization_id)
            .await
            .with_context(|| ctx("get queue entry"))?;

        if item.status != QueueStatus::Scheduled {
            tracing::warn!(queue_id = %queue_id, status = %item.status, "cannot cancel non-scheduled email");
            return Err(EmailError::NotScheduled)
                .with_context(|| ctx("check cancel eligibility").tag("status", item.status));
        }

        item.status = QueueStatus::Cancelled;
        let item = self.queue.update(item).await.with_context(|| ctx("update queue for cancel"))?;
        tracing::info!(queue_id = %queue_id, "scheduled email cancelled");
        Ok(item)
    }

    /// Fold a delivery event into the queue item's log, creating it on the
    /// first event. Re-delivering an event leaves the row unchanged.
    pub async fn log_email_event(&self, tenant: &TenantContext, mut event: LogEvent) -> TmsResult<EmailLog> {
        event.organization_id = tenant.organization_id.clone();
        if event.business_unit_id.is_nil() {
            event.business_unit_id = tenant.business_unit_id.clone();
        }
        let ctx = || {
            ErrorContext::new("log email event")
                .tag("queueId", &event.queue_id)
                .tag("status", event.status)
        };

        let now = unix_now();
        let log = match self
            .logs
            .get_by_queue_id(&event.queue_id, &tenant.organization_id)
            .await
            .with_context(ctx)?
        {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.apply(&event);
                if merged == existing {
                    return Ok(existing);
                }
                merged.updated_at = now;
                merged
            }
            None => EmailLog::from_event(&event, now),
        };

        self.logs.upsert(log).await.with_context(ctx)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tms_core::email::{EmailTemplate, LogStatus, ProviderType};
    use tms_core::{ErrorKind, TmsError};
    use tms_storage::InMemoryAttachmentHandler;
    use tms_test_utils::MockEmailProvider;

    struct Fixture {
        service: EmailService,
        provider: Arc<MockEmailProvider>,
        tenant: TenantContext,
    }

    async fn fixture() -> Fixture {
        let provider = Arc::new(MockEmailProvider::new(ProviderType::Smtp));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let service = EmailService::new(
            EmailStores::in_memory(),
            Arc::new(InMemoryAttachmentHandler::new()),
            Arc::new(registry),
            Arc::new(Encryptor::from_passphrase("email-service-test")),
            &EmailQueueConfig::default(),
        );

        let tenant = TenantContext::new(Pulid::new("org"), Pulid::new("bu"), Pulid::new("usr"));
        let mut profile = EmailProfile::smtp(
            tenant.organization_id.clone(),
            "Primary",
            "smtp.example.com",
            "ops@example.com",
        );
        profile.username = "ops".to_string();
        profile.password = "hunter2".to_string();
        profile.is_default = true;
        service.profiles().create(profile).await.unwrap();

        Fixture {
            service,
            provider,
            tenant,
        }
    }

    fn request() -> SendEmailRequest {
        SendEmailRequest {
            to: vec!["ann@example.com".to_string()],
            subject: "Hello".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_email_uses_default_profile() {
        let f = fixture().await;
        let resp = f.service.send_email(&f.tenant, request()).await.unwrap();
        assert_eq!(resp.status, QueueStatus::Sent);
        assert!(!resp.message_id.is_empty());

        let sent = f.provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].headers.get("X-Queue-ID").map(String::as_str),
            Some(resp.queue_id.as_str())
        );

        let status = f.service.get_email_status(&f.tenant, &resp.queue_id).await.unwrap();
        assert_eq!(status.log.map(|l| l.status), Some(LogStatus::Delivered));
    }

    #[tokio::test]
    async fn test_invalid_request_is_validation_error() {
        let f = fixture().await;
        let mut req = request();
        req.to = vec!["nope".to_string()];
        let err = f.service.send_email(&f.tenant, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.provider.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_send_templated_email() {
        let f = fixture().await;
        let template = f
            .service
            .templates()
            .create(EmailTemplate::new(
                f.tenant.organization_id.clone(),
                "welcome",
                "Welcome {{ .Name }}",
                "<p>Hi {{ .Name }}</p>",
            ))
            .await
            .unwrap();

        let mut variables = Map::new();
        variables.insert("Name".to_string(), json!("Ann & Co"));
        let resp = f
            .service
            .send_templated_email(
                &f.tenant,
                SendTemplatedEmailRequest {
                    template_id: template.id,
                    profile_id: None,
                    to: vec!["ann@example.com".to_string()],
                    cc: vec![],
                    bcc: vec![],
                    variables,
                    attachments: vec![],
                    priority: Priority::High,
                    metadata: Metadata::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.status, QueueStatus::Sent);

        let sent = f.provider.sent();
        assert_eq!(sent[0].subject, "Welcome Ann & Co");
        assert_eq!(sent[0].html, "<p>Hi Ann &amp; Co</p>");
    }

    #[tokio::test]
    async fn test_schedule_and_cancel() {
        let f = fixture().await;
        let item = f
            .service
            .queue_email(
                &f.tenant,
                QueueEmailRequest {
                    email: request(),
                    scheduled_at: Some(unix_now() + 3600),
                    max_retries: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(item.status, QueueStatus::Scheduled);

        let stats = f.service.process_email_queue().await.unwrap();
        assert_eq!(stats.processed, 0);

        let cancelled = f.service.cancel_scheduled_email(&f.tenant, &item.id).await.unwrap();
        assert_eq!(cancelled.status, QueueStatus::Cancelled);

        let err = f.service.cancel_scheduled_email(&f.tenant, &item.id).await.unwrap_err();
        assert!(matches!(err.root(), TmsError::Email(EmailError::NotScheduled)));
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
    }

    #[tokio::test]
    async fn test_retry_failed_email() {
        let f = fixture().await;
        f.provider.set_failure(Some("550 mailbox unavailable"));
        let item = f
            .service
            .queue_email(
                &f.tenant,
                QueueEmailRequest {
                    email: request(),
                    scheduled_at: None,
                    max_retries: Some(0),
                },
            )
            .await
            .unwrap();
        f.service.process_email_queue().await.unwrap();

        let status = f.service.get_email_status(&f.tenant, &item.id).await.unwrap();
        assert_eq!(status.status, QueueStatus::Failed);
        assert_eq!(status.error_message.as_deref(), Some("550 mailbox unavailable"));

        let err = f.service.retry_failed_email(&f.tenant, &item.id).await.unwrap_err();
        assert!(matches!(err.root(), TmsError::Email(EmailError::CannotRetry { .. })));
    }

    #[tokio::test]
    async fn test_test_email_profile_reports_failure() {
        let f = fixture().await;
        let profile = f.service.profiles().get_default(&f.tenant.organization_id).await.unwrap();

        let ok = f.service.test_email_profile(&f.tenant, &profile.id).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.message, "Email profile configuration is valid");

        f.provider.set_failure(Some("connection refused"));
        let failed = f.service.test_email_profile(&f.tenant, &profile.id).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.message, "Connection test failed: connection refused");
        assert_eq!(failed.details["error"], "connection refused");
        assert_eq!(failed.details["port"], 587);
    }

    #[tokio::test]
    async fn test_log_email_event_is_idempotent() {
        let f = fixture().await;
        let resp = f.service.send_email(&f.tenant, request()).await.unwrap();
        let event = LogEvent {
            organization_id: Pulid::nil(),
            business_unit_id: Pulid::nil(),
            queue_id: resp.queue_id.clone(),
            message_id: resp.message_id.clone(),
            status: LogStatus::Clicked,
            occurred_at: 1_734_000_000,
            clicked_urls: vec!["https://example.com/track".to_string()],
            bounce_type: None,
            bounce_reason: None,
            ip_address: Some("203.0.113.9".to_string()),
            user_agent: None,
            payload: Some(json!({ "event": "click" })),
        };

        let first = f.service.log_email_event(&f.tenant, event.clone()).await.unwrap();
        let second = f.service.log_email_event(&f.tenant, event).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.clicked_urls.len(), 1);
        assert_eq!(second.webhook_events.len(), 1);
        assert_eq!(second.status, LogStatus::Clicked);
    }
}
