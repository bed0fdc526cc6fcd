//! Queue processing: moves items through Processing to Sent, Pending (retry)
//! or Failed.

use super::builder::MessageBuilder;
use super::sender::EmailSender;
use serde::Serialize;
use std::sync::Arc;
use tms_core::email::{EmailLog, QueueItem, QueueStatus};
use tms_core::{unix_now, ErrorContext, ResultExt, TmsError, TmsResult};
use tms_storage::{LogRepository, ProfileRepository, QueueRepository};

/// What happened to one item in a processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemOutcome {
    Sent,
    /// Send failed with retries left; the item is Pending again.
    Retrying,
    Failed,
}

/// Counters for one call to [`QueueProcessor::process_queue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStats {
    pub processed: u64,
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
    pub errors: u64,
}

impl ProcessStats {
    fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Sent => self.sent += 1,
            ItemOutcome::Retrying => self.retried += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Clone)]
pub struct QueueProcessor {
    queue: Arc<dyn QueueRepository>,
    logs: Arc<dyn LogRepository>,
    profiles: Arc<dyn ProfileRepository>,
    builder: MessageBuilder,
    sender: EmailSender,
    batch_size: usize,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        logs: Arc<dyn LogRepository>,
        profiles: Arc<dyn ProfileRepository>,
        builder: MessageBuilder,
        sender: EmailSender,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            logs,
            profiles,
            builder,
            sender,
            batch_size: batch_size.max(1),
        }
    }

    /// One polling pass: pending items first, then scheduled items that are
    /// due, each capped at the batch size.
    ///
    /// Only a failure to fetch either list is returned; per-item failures are
    /// logged and counted.
    pub async fn process_queue(&self) -> TmsResult<ProcessStats> {
        let pending = self
            .queue
            .fetch_pending(self.batch_size)
            .await
            .op("fetch pending emails")
            .inspect_err(|e| tracing::error!(error = %e, "failed to fetch pending emails"))?;
        let scheduled = self
            .queue
            .fetch_due_scheduled(unix_now(), self.batch_size)
            .await
            .op("fetch scheduled emails")
            .inspect_err(|e| tracing::error!(error = %e, "failed to fetch scheduled emails"))?;

        let mut stats = ProcessStats::default();
        for item in pending.into_iter().chain(scheduled) {
            let queue_id = item.id.clone();
            match self.process_single_item(item).await {
                Ok(outcome) => stats.record(outcome),
                Err(err) => {
                    stats.errors += 1;
                    tracing::warn!(queue_id = %queue_id, error = %err, "failed to process email");
                }
            }
        }

        if stats.processed > 0 || stats.errors > 0 {
            tracing::info!(
                processed = stats.processed,
                sent = stats.sent,
                retried = stats.retried,
                failed = stats.failed,
                errors = stats.errors,
                "email queue pass complete"
            );
        }
        Ok(stats)
    }

    /// Drive one item to its next resting state.
    ///
    /// Delivery failures become part of the item's state and are not
    /// returned; an `Err` means the queue row itself could not be written.
    pub async fn process_single_item(&self, mut item: QueueItem) -> TmsResult<ItemOutcome> {
        let ctx = |item: &QueueItem| {
            ErrorContext::new("process email")
                .tag("queueId", &item.id)
                .tag("organizationId", &item.organization_id)
        };

        item.status = QueueStatus::Processing;
        let mut item = self.queue.update(item.clone()).await.with_context(|| ctx(&item))?;

        let profile = match self.profiles.get(&item.profile_id, &item.organization_id).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(queue_id = %item.id, error = %err, "email profile unavailable");
                item.status = QueueStatus::Failed;
                item.error_message = Some(err.root().to_string());
                self.queue.update(item.clone()).await.with_context(|| ctx(&item))?;
                return Ok(ItemOutcome::Failed);
            }
        };

        let delivery = match self.builder.build(&profile, &item).await {
            Ok(message) => self.sender.send(&profile, &message, item.id.as_str()).await,
            Err(err) => Err(err),
        };

        match delivery {
            Ok(message_id) => {
                let now = unix_now();
                item.status = QueueStatus::Sent;
                item.message_id = Some(message_id.clone());
                item.sent_at = Some(now);
                item.error_message = None;
                let item = self.queue.update(item.clone()).await.with_context(|| ctx(&item))?;

                tracing::info!(queue_id = %item.id, message_id = %message_id, "email sent");
                if let Err(err) = self.logs.upsert(EmailLog::delivered(&item, &message_id, now)).await {
                    tracing::error!(queue_id = %item.id, error = %err, "failed to write delivery log");
                }
                Ok(ItemOutcome::Sent)
            }
            Err(err) => self.record_failure(item, &err).await,
        }
    }

    async fn record_failure(&self, mut item: QueueItem, err: &TmsError) -> TmsResult<ItemOutcome> {
        let reason = err.root().to_string();
        let outcome = if item.can_retry() {
            item.retry_count += 1;
            item.status = QueueStatus::Pending;
            ItemOutcome::Retrying
        } else {
            item.status = QueueStatus::Failed;
            ItemOutcome::Failed
        };
        item.error_message = Some(reason);

        tracing::warn!(
            queue_id = %item.id,
            retry_count = item.retry_count,
            max_retries = item.max_retries,
            status = %item.status,
            error = %err,
            "email send failed"
        );

        let queue_id = item.id.clone();
        let organization_id = item.organization_id.clone();
        self.queue.update(item).await.with_context(|| {
            ErrorContext::new("process email")
                .tag("queueId", &queue_id)
                .tag("organizationId", &organization_id)
        })?;
        Ok(outcome)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderRegistry;
    use tms_core::email::{EmailProfile, ProviderType};
    use tms_core::{Encryptor, Pulid};
    use tms_storage::{InMemoryAttachmentHandler, InMemoryEmailStore};
    use tms_test_utils::MockEmailProvider;

    struct Fixture {
        store: Arc<InMemoryEmailStore>,
        provider: Arc<MockEmailProvider>,
        processor: QueueProcessor,
        org: Pulid,
        profile_id: Pulid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEmailStore::new());
        let provider = Arc::new(MockEmailProvider::new(ProviderType::Smtp));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let sender = EmailSender::new(
            Arc::new(registry),
            Arc::new(Encryptor::from_passphrase("processor-test-key")),
        );
        let processor = QueueProcessor::new(
            store.clone(),
            store.clone(),
            store.clone(),
            MessageBuilder::new(Arc::new(InMemoryAttachmentHandler::new())),
            sender,
            100,
        );

        let org = Pulid::new("org");
        let profile = ProfileRepository::create(
            store.as_ref(),
            EmailProfile::smtp(org.clone(), "Primary", "smtp.example.com", "ops@example.com"),
        )
        .await
        .unwrap();

        Fixture {
            store,
            provider,
            processor,
            org,
            profile_id: profile.id,
        }
    }

    async fn enqueue(f: &Fixture, max_retries: i32) -> QueueItem {
        let mut item = QueueItem::new(
            f.org.clone(),
            f.profile_id.clone(),
            vec!["ann@example.com".to_string()],
            "Hello",
        );
        item.html_body = "<p>Hi</p>".to_string();
        item.max_retries = max_retries;
        QueueRepository::create(f.store.as_ref(), item).await.unwrap()
    }

    #[tokio::test]
    async fn test_success_marks_sent_and_logs() {
        let f = fixture().await;
        let item = enqueue(&f, 3).await;

        let stats = f.processor.process_queue().await.unwrap();
        assert_eq!(stats.sent, 1);

        let sent = QueueRepository::get(f.store.as_ref(), &item.id, &f.org).await.unwrap();
        assert_eq!(sent.status, QueueStatus::Sent);
        assert!(sent.message_id.as_deref().is_some_and(|m| !m.is_empty()));
        assert!(sent.sent_at.is_some());
        let log = f.store.get_by_queue_id(&item.id, &f.org).await.unwrap().unwrap();
        assert_eq!(log.status, tms_core::email::LogStatus::Delivered);
        assert_eq!(f.provider.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_then_fail() {
        let f = fixture().await;
        let item = enqueue(&f, 2).await;
        f.provider.set_failure(Some("421 try again later"));

        for expected in [1, 2] {
            f.processor.process_queue().await.unwrap();
            let row = QueueRepository::get(f.store.as_ref(), &item.id, &f.org).await.unwrap();
            assert_eq!(row.status, QueueStatus::Pending);
            assert_eq!(row.retry_count, expected);
        }

        let stats = f.processor.process_queue().await.unwrap();
        assert_eq!(stats.failed, 1);
        let row = QueueRepository::get(f.store.as_ref(), &item.id, &f.org).await.unwrap();
        assert_eq!(row.status, QueueStatus::Failed);
        assert_eq!(row.retry_count, 2);
        assert_eq!(row.error_message.as_deref(), Some("421 try again later"));
    }

    #[tokio::test]
    async fn test_missing_profile_fails_item() {
        let f = fixture().await;
        let mut item = enqueue(&f, 3).await;
        item.profile_id = Pulid::new("prof");
        let item = QueueRepository::update(f.store.as_ref(), item).await.unwrap();

        let outcome = f.processor.process_single_item(item.clone()).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Failed);
        let row = QueueRepository::get(f.store.as_ref(), &item.id, &f.org).await.unwrap();
        assert_eq!(row.status, QueueStatus::Failed);
        assert!(row.error_message.is_some());
        assert_eq!(f.provider.sent_count(), 0);
    }
}
