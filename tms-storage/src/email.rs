//! Email repositories.
//!
//! Every read and write is scoped by organization; a record owned by another
//! organization is reported as not found. Repositories assign ids to records
//! created with a nil id and maintain `created_at`/`updated_at`/`version`.

use async_trait::async_trait;
use std::collections::HashMap;
use tms_core::email::{EmailLog, EmailProfile, EmailTemplate, QueueItem, QueueStatus};
use tms_core::pulid::prefix;
use tms_core::{unix_now, EmailError, Pulid, StorageError, TmsResult};
use tokio::sync::RwLock;

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Persist a new profile. Storing a default clears the previous default
    /// of the organization in the same step.
    async fn create(&self, profile: EmailProfile) -> TmsResult<EmailProfile>;

    async fn update(&self, profile: EmailProfile) -> TmsResult<EmailProfile>;

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailProfile>;

    async fn list(&self, organization_id: &Pulid) -> TmsResult<Vec<EmailProfile>>;

    async fn delete(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<()>;

    /// The organization's active default profile.
    async fn get_default(&self, organization_id: &Pulid) -> TmsResult<EmailProfile>;

    /// Make `id` the only default profile of the organization.
    async fn set_default(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailProfile>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Persist a new template; slugs are unique per organization.
    async fn create(&self, template: EmailTemplate) -> TmsResult<EmailTemplate>;

    async fn update(&self, template: EmailTemplate) -> TmsResult<EmailTemplate>;

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailTemplate>;

    async fn get_by_slug(&self, slug: &str, organization_id: &Pulid) -> TmsResult<EmailTemplate>;

    async fn list(&self, organization_id: &Pulid) -> TmsResult<Vec<EmailTemplate>>;

    async fn delete(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<()>;
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn create(&self, item: QueueItem) -> TmsResult<QueueItem>;

    /// Replace the stored row. Status, message id and sent time are written
    /// together so readers never see `Sent` without its message id.
    async fn update(&self, item: QueueItem) -> TmsResult<QueueItem>;

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<QueueItem>;

    /// Pending items, highest priority first, then oldest first.
    async fn fetch_pending(&self, limit: usize) -> TmsResult<Vec<QueueItem>>;

    /// Scheduled items due at `now`, highest priority first, then earliest
    /// schedule first.
    async fn fetch_due_scheduled(&self, now: i64, limit: usize) -> TmsResult<Vec<QueueItem>>;
}

#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Insert, or replace the existing log for the same queue item.
    async fn upsert(&self, log: EmailLog) -> TmsResult<EmailLog>;

    async fn get_by_queue_id(
        &self,
        queue_id: &Pulid,
        organization_id: &Pulid,
    ) -> TmsResult<Option<EmailLog>>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// All four email repositories over process-local maps.
#[derive(Debug, Default)]
pub struct InMemoryEmailStore {
    profiles: RwLock<HashMap<Pulid, EmailProfile>>,
    templates: RwLock<HashMap<Pulid, EmailTemplate>>,
    queue: RwLock<HashMap<Pulid, QueueItem>>,
    logs: RwLock<HashMap<Pulid, EmailLog>>,
}

impl InMemoryEmailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.read().await.len()
    }

    pub async fn log_count(&self) -> usize {
        self.logs.read().await.len()
    }
}

fn owned<'a, T>(
    map: &'a HashMap<Pulid, T>,
    entity: &str,
    id: &Pulid,
    organization_id: &Pulid,
    org_of: impl Fn(&T) -> &Pulid,
) -> TmsResult<&'a T> {
    map.get(id)
        .filter(|record| org_of(record) == organization_id)
        .ok_or_else(|| StorageError::not_found(entity, id).into())
}

fn clear_other_defaults(profiles: &mut HashMap<Pulid, EmailProfile>, keep: &EmailProfile) {
    if !keep.is_default {
        return;
    }
    for profile in profiles.values_mut() {
        if profile.organization_id == keep.organization_id && profile.id != keep.id {
            profile.is_default = false;
        }
    }
}

#[async_trait]
impl ProfileRepository for InMemoryEmailStore {
    async fn create(&self, mut profile: EmailProfile) -> TmsResult<EmailProfile> {
        let mut profiles = self.profiles.write().await;
        if profile.id.is_nil() {
            profile.id = Pulid::new(prefix::EMAIL_PROFILE);
        }
        if profiles.contains_key(&profile.id) {
            return Err(StorageError::Duplicate {
                entity: "email profile".to_string(),
                reason: format!("id {} already exists", profile.id),
            }
            .into());
        }
        let now = unix_now();
        profile.created_at = now;
        profile.updated_at = now;
        profile.version = 0;

        clear_other_defaults(&mut profiles, &profile);
        profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    async fn update(&self, mut profile: EmailProfile) -> TmsResult<EmailProfile> {
        let mut profiles = self.profiles.write().await;
        let existing = owned(
            &profiles,
            "email profile",
            &profile.id,
            &profile.organization_id,
            |p| &p.organization_id,
        )?;
        profile.created_at = existing.created_at;
        profile.version = existing.version + 1;
        profile.updated_at = unix_now();

        clear_other_defaults(&mut profiles, &profile);
        profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        let profiles = self.profiles.read().await;
        owned(&profiles, "email profile", id, organization_id, |p| {
            &p.organization_id
        })
        .cloned()
    }

    async fn list(&self, organization_id: &Pulid) -> TmsResult<Vec<EmailProfile>> {
        let profiles = self.profiles.read().await;
        let mut list: Vec<EmailProfile> = profiles
            .values()
            .filter(|p| &p.organization_id == organization_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn delete(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<()> {
        let mut profiles = self.profiles.write().await;
        owned(&profiles, "email profile", id, organization_id, |p| {
            &p.organization_id
        })?;
        profiles.remove(id);
        Ok(())
    }

    async fn get_default(&self, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        let profiles = self.profiles.read().await;
        profiles
            .values()
            .find(|p| &p.organization_id == organization_id && p.is_default && p.is_active())
            .cloned()
            .ok_or_else(|| {
                EmailError::NoDefaultProfile {
                    organization_id: organization_id.to_string(),
                }
                .into()
            })
    }

    async fn set_default(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        let mut profiles = self.profiles.write().await;
        let mut profile = owned(&profiles, "email profile", id, organization_id, |p| {
            &p.organization_id
        })?
        .clone();
        profile.is_default = true;
        profile.version += 1;
        profile.updated_at = unix_now();

        clear_other_defaults(&mut profiles, &profile);
        profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }
}

#[async_trait]
impl TemplateRepository for InMemoryEmailStore {
    async fn create(&self, mut template: EmailTemplate) -> TmsResult<EmailTemplate> {
        let mut templates = self.templates.write().await;
        if template.id.is_nil() {
            template.id = Pulid::new(prefix::EMAIL_TEMPLATE);
        }
        let slug_taken = templates.values().any(|t| {
            t.organization_id == template.organization_id && t.slug == template.slug
        });
        if slug_taken || templates.contains_key(&template.id) {
            return Err(StorageError::Duplicate {
                entity: "email template".to_string(),
                reason: format!("slug '{}' already exists", template.slug),
            }
            .into());
        }
        let now = unix_now();
        template.created_at = now;
        template.updated_at = now;
        template.version = 0;
        templates.insert(template.id.clone(), template.clone());
        Ok(template)
    }

    async fn update(&self, mut template: EmailTemplate) -> TmsResult<EmailTemplate> {
        let mut templates = self.templates.write().await;
        let existing = owned(
            &templates,
            "email template",
            &template.id,
            &template.organization_id,
            |t| &t.organization_id,
        )?;
        let slug_taken = templates.values().any(|t| {
            t.organization_id == template.organization_id
                && t.slug == template.slug
                && t.id != template.id
        });
        if slug_taken {
            return Err(StorageError::Duplicate {
                entity: "email template".to_string(),
                reason: format!("slug '{}' already exists", template.slug),
            }
            .into());
        }
        template.created_at = existing.created_at;
        template.version = existing.version + 1;
        template.updated_at = unix_now();
        templates.insert(template.id.clone(), template.clone());
        Ok(template)
    }

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailTemplate> {
        let templates = self.templates.read().await;
        owned(&templates, "email template", id, organization_id, |t| {
            &t.organization_id
        })
        .cloned()
    }

    async fn get_by_slug(&self, slug: &str, organization_id: &Pulid) -> TmsResult<EmailTemplate> {
        let templates = self.templates.read().await;
        templates
            .values()
            .find(|t| &t.organization_id == organization_id && t.slug == slug)
            .cloned()
            .ok_or_else(|| StorageError::not_found("email template", slug).into())
    }

    async fn list(&self, organization_id: &Pulid) -> TmsResult<Vec<EmailTemplate>> {
        let templates = self.templates.read().await;
        let mut list: Vec<EmailTemplate> = templates
            .values()
            .filter(|t| &t.organization_id == organization_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(list)
    }

    async fn delete(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<()> {
        let mut templates = self.templates.write().await;
        owned(&templates, "email template", id, organization_id, |t| {
            &t.organization_id
        })?;
        templates.remove(id);
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for InMemoryEmailStore {
    async fn create(&self, mut item: QueueItem) -> TmsResult<QueueItem> {
        let mut queue = self.queue.write().await;
        if item.id.is_nil() {
            item.id = Pulid::new(prefix::EMAIL_QUEUE);
        }
        if queue.contains_key(&item.id) {
            return Err(StorageError::Duplicate {
                entity: "email queue item".to_string(),
                reason: format!("id {} already exists", item.id),
            }
            .into());
        }
        let now = unix_now();
        item.created_at = now;
        item.updated_at = now;
        queue.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn update(&self, mut item: QueueItem) -> TmsResult<QueueItem> {
        let mut queue = self.queue.write().await;
        let existing = owned(
            &queue,
            "email queue item",
            &item.id,
            &item.organization_id,
            |q| &q.organization_id,
        )?;
        item.created_at = existing.created_at;
        item.updated_at = unix_now();
        queue.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<QueueItem> {
        let queue = self.queue.read().await;
        owned(&queue, "email queue item", id, organization_id, |q| {
            &q.organization_id
        })
        .cloned()
    }

    async fn fetch_pending(&self, limit: usize) -> TmsResult<Vec<QueueItem>> {
        let queue = self.queue.read().await;
        let mut items: Vec<QueueItem> = queue
            .values()
            .filter(|q| q.status == QueueStatus::Pending)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        items.truncate(limit);
        Ok(items)
    }

    async fn fetch_due_scheduled(&self, now: i64, limit: usize) -> TmsResult<Vec<QueueItem>> {
        let queue = self.queue.read().await;
        let mut items: Vec<QueueItem> = queue.values().filter(|q| q.is_due(now)).cloned().collect();
        items.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        items.truncate(limit);
        Ok(items)
    }
}

#[async_trait]
impl LogRepository for InMemoryEmailStore {
    async fn upsert(&self, mut log: EmailLog) -> TmsResult<EmailLog> {
        let mut logs = self.logs.write().await;
        match logs.get(&log.queue_id) {
            Some(existing) => {
                log.id = existing.id.clone();
                log.created_at = existing.created_at;
            }
            None if log.id.is_nil() => log.id = Pulid::new(prefix::EMAIL_LOG),
            None => {}
        }
        logs.insert(log.queue_id.clone(), log.clone());
        Ok(log)
    }

    async fn get_by_queue_id(
        &self,
        queue_id: &Pulid,
        organization_id: &Pulid,
    ) -> TmsResult<Option<EmailLog>> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(queue_id)
            .filter(|l| &l.organization_id == organization_id)
            .cloned())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tms_core::email::{LogEvent, LogStatus, Priority};
    use tms_core::ErrorKind;

    fn org() -> Pulid {
        Pulid::from_uuid("org", uuid::Uuid::from_u128(7))
    }

    fn profile(name: &str, is_default: bool) -> EmailProfile {
        let mut p = EmailProfile::smtp(org(), name, "smtp.example.com", "ops@example.com");
        p.is_default = is_default;
        p
    }

    #[tokio::test]
    async fn test_single_default_per_organization() {
        let store = InMemoryEmailStore::new();
        let first = ProfileRepository::create(&store, profile("a", true)).await.unwrap();
        let second = ProfileRepository::create(&store, profile("b", true)).await.unwrap();

        let default = store.get_default(&org()).await.unwrap();
        assert_eq!(default.id, second.id);
        let first = ProfileRepository::get(&store, &first.id, &org()).await.unwrap();
        assert!(!first.is_default);

        store.set_default(&first.id, &org()).await.unwrap();
        let defaults: Vec<_> = ProfileRepository::list(&store, &org())
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, first.id);
    }

    #[tokio::test]
    async fn test_no_default_profile() {
        let store = InMemoryEmailStore::new();
        let err = store.get_default(&org()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_cross_organization_reads_are_not_found() {
        let store = InMemoryEmailStore::new();
        let created = ProfileRepository::create(&store, profile("a", false)).await.unwrap();
        let other = Pulid::new("org");
        let err = ProfileRepository::get(&store, &created.id, &other).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_template_slug_unique_per_org() {
        let store = InMemoryEmailStore::new();
        let t = EmailTemplate::new(org(), "welcome", "Hi", "<p>Hi</p>");
        TemplateRepository::create(&store, t.clone()).await.unwrap();
        let err = TemplateRepository::create(&store, t).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let elsewhere = EmailTemplate::new(Pulid::new("org"), "welcome", "Hi", "<p>Hi</p>");
        assert!(TemplateRepository::create(&store, elsewhere).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_ordering_by_priority() {
        let store = InMemoryEmailStore::new();
        let mut ids = Vec::new();
        for priority in [Priority::Low, Priority::High, Priority::Medium] {
            let mut item = QueueItem::new(org(), Pulid::new("prof"), vec!["a@b.co".into()], "s");
            item.priority = priority;
            ids.push(QueueRepository::create(&store, item).await.unwrap().id);
        }
        let pending = store.fetch_pending(10).await.unwrap();
        let priorities: Vec<Priority> = pending.iter().map(|q| q.priority).collect();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
        assert_eq!(store.fetch_pending(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_due_scheduled_only() {
        let store = InMemoryEmailStore::new();
        for at in [100, 200, 300] {
            let mut item = QueueItem::new(org(), Pulid::new("prof"), vec!["a@b.co".into()], "s");
            item.status = QueueStatus::Scheduled;
            item.scheduled_at = Some(at);
            QueueRepository::create(&store, item).await.unwrap();
        }
        let due = store.fetch_due_scheduled(200, 10).await.unwrap();
        let times: Vec<_> = due.iter().map(|q| q.scheduled_at).collect();
        assert_eq!(times, vec![Some(100), Some(200)]);
    }

    #[tokio::test]
    async fn test_log_upsert_keeps_identity() {
        let store = InMemoryEmailStore::new();
        let item = QueueRepository::create(
            &store,
            QueueItem::new(org(), Pulid::new("prof"), vec!["a@b.co".into()], "s"),
        )
        .await
        .unwrap();
        let first = store
            .upsert(EmailLog::delivered(&item, "m-1", 10))
            .await
            .unwrap();

        let mut log = store
            .get_by_queue_id(&item.id, &org())
            .await
            .unwrap()
            .unwrap();
        log.apply(&LogEvent {
            organization_id: org(),
            business_unit_id: Pulid::nil(),
            queue_id: item.id.clone(),
            message_id: "m-1".to_string(),
            status: LogStatus::Opened,
            occurred_at: 20,
            clicked_urls: Vec::new(),
            bounce_type: None,
            bounce_reason: None,
            ip_address: None,
            user_agent: None,
            payload: None,
        });
        let second = store.upsert(log).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.opened_at, Some(20));
        assert_eq!(store.log_count().await, 1);
    }
}
