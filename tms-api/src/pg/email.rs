//! Email repositories in PostgreSQL.

use super::{conn, is_unique_violation, query_failed};
use crate::db::DbClient;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tms_core::email::{EmailLog, EmailProfile, EmailTemplate, QueueItem, QueueStatus};
use tms_core::pulid::prefix;
use tms_core::{unix_now, EmailError, Pulid, StorageError, TmsError, TmsResult};
use tms_storage::{LogRepository, ProfileRepository, QueueRepository, TemplateRepository};
use tokio_postgres::Row;

/// All four email repositories over one connection pool.
#[derive(Clone)]
pub struct PgEmailStore {
    db: DbClient,
}

impl PgEmailStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

fn to_data<T: Serialize>(record: &T) -> TmsResult<Value> {
    serde_json::to_value(record).map_err(|e| {
        StorageError::QueryFailed {
            reason: format!("cannot serialize record: {}", e),
        }
        .into()
    })
}

fn from_data<T: DeserializeOwned>(row: &Row, entity: &str) -> TmsResult<T> {
    let data: Value = row.get("data");
    serde_json::from_value(data).map_err(|e| {
        StorageError::QueryFailed {
            reason: format!("stored {} is invalid: {}", entity, e),
        }
        .into()
    })
}

/// Serialized name of a unit enum, e.g. `Active`.
fn variant_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

fn duplicate(entity: &str, reason: String) -> TmsError {
    StorageError::Duplicate {
        entity: entity.to_string(),
        reason,
    }
    .into()
}

fn write_failed(entity: &str, err: tokio_postgres::Error, reason: impl FnOnce() -> String) -> TmsError {
    if is_unique_violation(&err) {
        duplicate(entity, reason())
    } else {
        query_failed(err)
    }
}

// ============================================================================
// PROFILES
// ============================================================================

const PROFILE_COLUMNS: &str = "data, is_default, version, created_at, updated_at";

fn row_to_profile(row: &Row) -> TmsResult<EmailProfile> {
    let mut profile: EmailProfile = from_data(row, "email profile")?;
    // The column is authoritative; other rows' defaults are cleared there only.
    profile.is_default = row.get("is_default");
    profile.version = row.get("version");
    profile.created_at = row.get("created_at");
    profile.updated_at = row.get("updated_at");
    Ok(profile)
}

#[async_trait]
impl ProfileRepository for PgEmailStore {
    async fn create(&self, mut profile: EmailProfile) -> TmsResult<EmailProfile> {
        if profile.id.is_nil() {
            profile.id = Pulid::new(prefix::EMAIL_PROFILE);
        }
        let now = unix_now();
        profile.created_at = now;
        profile.updated_at = now;
        profile.version = 0;
        let data = to_data(&profile)?;

        let mut client = conn(&self.db).await?;
        let tx = client.transaction().await.map_err(query_failed)?;
        if profile.is_default {
            tx.execute(
                "UPDATE email_profiles SET is_default = FALSE WHERE organization_id = $1",
                &[&profile.organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?;
        }
        tx.execute(
            "INSERT INTO email_profiles \
             (id, organization_id, business_unit_id, name, provider_type, status, is_default, \
              data, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $9)",
            &[
                &profile.id.as_str(),
                &profile.organization_id.as_str(),
                &profile.business_unit_id.as_str(),
                &profile.name,
                &profile.provider_type.as_str(),
                &variant_name(&profile.status),
                &profile.is_default,
                &data,
                &now,
            ],
        )
        .await
        .map_err(|e| write_failed("email profile", e, || format!("id {} already exists", profile.id)))?;
        tx.commit().await.map_err(query_failed)?;
        Ok(profile)
    }

    async fn update(&self, mut profile: EmailProfile) -> TmsResult<EmailProfile> {
        let mut client = conn(&self.db).await?;
        let tx = client.transaction().await.map_err(query_failed)?;
        let existing = tx
            .query_opt(
                "SELECT version, created_at FROM email_profiles \
                 WHERE id = $1 AND organization_id = $2 FOR UPDATE",
                &[&profile.id.as_str(), &profile.organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TmsError::from(StorageError::not_found("email profile", &profile.id)))?;

        profile.version = existing.get::<_, i64>(0) + 1;
        profile.created_at = existing.get(1);
        profile.updated_at = unix_now();
        let data = to_data(&profile)?;

        if profile.is_default {
            tx.execute(
                "UPDATE email_profiles SET is_default = FALSE \
                 WHERE organization_id = $1 AND id <> $2",
                &[&profile.organization_id.as_str(), &profile.id.as_str()],
            )
            .await
            .map_err(query_failed)?;
        }
        tx.execute(
            "UPDATE email_profiles SET name = $3, provider_type = $4, status = $5, \
             is_default = $6, data = $7, version = $8, updated_at = $9 \
             WHERE id = $1 AND organization_id = $2",
            &[
                &profile.id.as_str(),
                &profile.organization_id.as_str(),
                &profile.name,
                &profile.provider_type.as_str(),
                &variant_name(&profile.status),
                &profile.is_default,
                &data,
                &profile.version,
                &profile.updated_at,
            ],
        )
        .await
        .map_err(query_failed)?;
        tx.commit().await.map_err(query_failed)?;
        Ok(profile)
    }

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        let client = conn(&self.db).await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM email_profiles WHERE id = $1 AND organization_id = $2",
                    PROFILE_COLUMNS
                ),
                &[&id.as_str(), &organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TmsError::from(StorageError::not_found("email profile", id)))?;
        row_to_profile(&row)
    }

    async fn list(&self, organization_id: &Pulid) -> TmsResult<Vec<EmailProfile>> {
        let client = conn(&self.db).await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM email_profiles WHERE organization_id = $1 ORDER BY name, id",
                    PROFILE_COLUMNS
                ),
                &[&organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?;
        rows.iter().map(row_to_profile).collect()
    }

    async fn delete(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<()> {
        let client = conn(&self.db).await?;
        let deleted = client
            .execute(
                "DELETE FROM email_profiles WHERE id = $1 AND organization_id = $2",
                &[&id.as_str(), &organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?;
        if deleted == 0 {
            return Err(StorageError::not_found("email profile", id).into());
        }
        Ok(())
    }

    async fn get_default(&self, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        let client = conn(&self.db).await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM email_profiles \
                     WHERE organization_id = $1 AND is_default AND status = 'Active'",
                    PROFILE_COLUMNS
                ),
                &[&organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| {
                TmsError::from(EmailError::NoDefaultProfile {
                    organization_id: organization_id.to_string(),
                })
            })?;
        row_to_profile(&row)
    }

    async fn set_default(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        let mut client = conn(&self.db).await?;
        let tx = client.transaction().await.map_err(query_failed)?;
        tx.execute(
            "UPDATE email_profiles SET is_default = FALSE \
             WHERE organization_id = $1 AND id <> $2 AND is_default",
            &[&organization_id.as_str(), &id.as_str()],
        )
        .await
        .map_err(query_failed)?;
        let row = tx
            .query_opt(
                &format!(
                    "UPDATE email_profiles SET is_default = TRUE, version = version + 1, updated_at = $3 \
                     WHERE id = $1 AND organization_id = $2 RETURNING {}",
                    PROFILE_COLUMNS
                ),
                &[&id.as_str(), &organization_id.as_str(), &unix_now()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TmsError::from(StorageError::not_found("email profile", id)))?;
        tx.commit().await.map_err(query_failed)?;
        row_to_profile(&row)
    }
}

// ============================================================================
// TEMPLATES
// ============================================================================

#[async_trait]
impl TemplateRepository for PgEmailStore {
    async fn create(&self, mut template: EmailTemplate) -> TmsResult<EmailTemplate> {
        if template.id.is_nil() {
            template.id = Pulid::new(prefix::EMAIL_TEMPLATE);
        }
        let now = unix_now();
        template.created_at = now;
        template.updated_at = now;
        template.version = 0;
        let data = to_data(&template)?;

        let client = conn(&self.db).await?;
        client
            .execute(
                "INSERT INTO email_templates \
                 (id, organization_id, business_unit_id, slug, data, version, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, 0, $6, $6)",
                &[
                    &template.id.as_str(),
                    &template.organization_id.as_str(),
                    &template.business_unit_id.as_str(),
                    &template.slug,
                    &data,
                    &now,
                ],
            )
            .await
            .map_err(|e| {
                write_failed("email template", e, || {
                    format!("slug '{}' already exists", template.slug)
                })
            })?;
        Ok(template)
    }

    async fn update(&self, mut template: EmailTemplate) -> TmsResult<EmailTemplate> {
        let mut client = conn(&self.db).await?;
        let tx = client.transaction().await.map_err(query_failed)?;
        let existing = tx
            .query_opt(
                "SELECT version, created_at FROM email_templates \
                 WHERE id = $1 AND organization_id = $2 FOR UPDATE",
                &[&template.id.as_str(), &template.organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TmsError::from(StorageError::not_found("email template", &template.id)))?;

        template.version = existing.get::<_, i64>(0) + 1;
        template.created_at = existing.get(1);
        template.updated_at = unix_now();
        let data = to_data(&template)?;

        tx.execute(
            "UPDATE email_templates SET slug = $3, data = $4, version = $5, updated_at = $6 \
             WHERE id = $1 AND organization_id = $2",
            &[
                &template.id.as_str(),
                &template.organization_id.as_str(),
                &template.slug,
                &data,
                &template.version,
                &template.updated_at,
            ],
        )
        .await
        .map_err(|e| {
            write_failed("email template", e, || {
                format!("slug '{}' already exists", template.slug)
            })
        })?;
        tx.commit().await.map_err(query_failed)?;
        Ok(template)
    }

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailTemplate> {
        let client = conn(&self.db).await?;
        let row = client
            .query_opt(
                "SELECT data FROM email_templates WHERE id = $1 AND organization_id = $2",
                &[&id.as_str(), &organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TmsError::from(StorageError::not_found("email template", id)))?;
        from_data(&row, "email template")
    }

    async fn get_by_slug(&self, slug: &str, organization_id: &Pulid) -> TmsResult<EmailTemplate> {
        let client = conn(&self.db).await?;
        let row = client
            .query_opt(
                "SELECT data FROM email_templates WHERE slug = $1 AND organization_id = $2",
                &[&slug, &organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TmsError::from(StorageError::not_found("email template", slug)))?;
        from_data(&row, "email template")
    }

    async fn list(&self, organization_id: &Pulid) -> TmsResult<Vec<EmailTemplate>> {
        let client = conn(&self.db).await?;
        let rows = client
            .query(
                "SELECT data FROM email_templates WHERE organization_id = $1 ORDER BY slug",
                &[&organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?;
        rows.iter().map(|r| from_data(r, "email template")).collect()
    }

    async fn delete(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<()> {
        let client = conn(&self.db).await?;
        let deleted = client
            .execute(
                "DELETE FROM email_templates WHERE id = $1 AND organization_id = $2",
                &[&id.as_str(), &organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?;
        if deleted == 0 {
            return Err(StorageError::not_found("email template", id).into());
        }
        Ok(())
    }
}

// ============================================================================
// QUEUE
// ============================================================================

#[async_trait]
impl QueueRepository for PgEmailStore {
    async fn create(&self, mut item: QueueItem) -> TmsResult<QueueItem> {
        if item.id.is_nil() {
            item.id = Pulid::new(prefix::EMAIL_QUEUE);
        }
        let now = unix_now();
        item.created_at = now;
        item.updated_at = now;
        let data = to_data(&item)?;

        let client = conn(&self.db).await?;
        client
            .execute(
                "INSERT INTO email_queue \
                 (id, organization_id, business_unit_id, profile_id, status, priority_rank, \
                  scheduled_at, retry_count, max_retries, data, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)",
                &[
                    &item.id.as_str(),
                    &item.organization_id.as_str(),
                    &item.business_unit_id.as_str(),
                    &item.profile_id.as_str(),
                    &item.status.as_str(),
                    &(item.priority.rank() as i16),
                    &item.scheduled_at,
                    &item.retry_count,
                    &item.max_retries,
                    &data,
                    &now,
                ],
            )
            .await
            .map_err(|e| write_failed("email queue item", e, || format!("id {} already exists", item.id)))?;
        Ok(item)
    }

    async fn update(&self, mut item: QueueItem) -> TmsResult<QueueItem> {
        let client = conn(&self.db).await?;
        let created_at: i64 = client
            .query_opt(
                "SELECT created_at FROM email_queue WHERE id = $1 AND organization_id = $2",
                &[&item.id.as_str(), &item.organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TmsError::from(StorageError::not_found("email queue item", &item.id)))?
            .get(0);
        item.created_at = created_at;
        item.updated_at = unix_now();
        let data = to_data(&item)?;

        // Status and message id live in the same row write.
        client
            .execute(
                "UPDATE email_queue SET status = $3, priority_rank = $4, scheduled_at = $5, \
                 retry_count = $6, max_retries = $7, data = $8, updated_at = $9 \
                 WHERE id = $1 AND organization_id = $2",
                &[
                    &item.id.as_str(),
                    &item.organization_id.as_str(),
                    &item.status.as_str(),
                    &(item.priority.rank() as i16),
                    &item.scheduled_at,
                    &item.retry_count,
                    &item.max_retries,
                    &data,
                    &item.updated_at,
                ],
            )
            .await
            .map_err(query_failed)?;
        Ok(item)
    }

    async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<QueueItem> {
        let client = conn(&self.db).await?;
        let row = client
            .query_opt(
                "SELECT data FROM email_queue WHERE id = $1 AND organization_id = $2",
                &[&id.as_str(), &organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?
            .ok_or_else(|| TmsError::from(StorageError::not_found("email queue item", id)))?;
        from_data(&row, "email queue item")
    }

    async fn fetch_pending(&self, limit: usize) -> TmsResult<Vec<QueueItem>> {
        let client = conn(&self.db).await?;
        let rows = client
            .query(
                "SELECT data FROM email_queue WHERE status = $1 \
                 ORDER BY priority_rank, created_at, id LIMIT $2",
                &[&QueueStatus::Pending.as_str(), &(limit as i64)],
            )
            .await
            .map_err(query_failed)?;
        rows.iter().map(|r| from_data(r, "email queue item")).collect()
    }

    async fn fetch_due_scheduled(&self, now: i64, limit: usize) -> TmsResult<Vec<QueueItem>> {
        let client = conn(&self.db).await?;
        let rows = client
            .query(
                "SELECT data FROM email_queue \
                 WHERE status = $1 AND scheduled_at IS NOT NULL AND scheduled_at <= $2 \
                 ORDER BY priority_rank, scheduled_at, id LIMIT $3",
                &[&QueueStatus::Scheduled.as_str(), &now, &(limit as i64)],
            )
            .await
            .map_err(query_failed)?;
        rows.iter().map(|r| from_data(r, "email queue item")).collect()
    }
}

// ============================================================================
// DELIVERY LOGS
// ============================================================================

#[async_trait]
impl LogRepository for PgEmailStore {
    async fn upsert(&self, mut log: EmailLog) -> TmsResult<EmailLog> {
        if log.id.is_nil() {
            log.id = Pulid::new(prefix::EMAIL_LOG);
        }
        let data = to_data(&log)?;
        let client = conn(&self.db).await?;
        let row = client
            .query_one(
                "INSERT INTO email_logs \
                 (id, organization_id, business_unit_id, queue_id, message_id, status, data, \
                  created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (queue_id) DO UPDATE SET \
                   message_id = EXCLUDED.message_id, status = EXCLUDED.status, \
                   data = EXCLUDED.data, updated_at = EXCLUDED.updated_at \
                 RETURNING id, created_at",
                &[
                    &log.id.as_str(),
                    &log.organization_id.as_str(),
                    &log.business_unit_id.as_str(),
                    &log.queue_id.as_str(),
                    &log.message_id,
                    &log.status.as_str(),
                    &data,
                    &log.created_at,
                    &log.updated_at,
                ],
            )
            .await
            .map_err(query_failed)?;

        // An existing row keeps its identity.
        let id: String = row.get(0);
        log.id = super::parse_id(&id)?;
        log.created_at = row.get(1);
        Ok(log)
    }

    async fn get_by_queue_id(
        &self,
        queue_id: &Pulid,
        organization_id: &Pulid,
    ) -> TmsResult<Option<EmailLog>> {
        let client = conn(&self.db).await?;
        let row = client
            .query_opt(
                "SELECT id, created_at, data FROM email_logs \
                 WHERE queue_id = $1 AND organization_id = $2",
                &[&queue_id.as_str(), &organization_id.as_str()],
            )
            .await
            .map_err(query_failed)?;
        match row {
            Some(row) => {
                let mut log: EmailLog = from_data(&row, "email log")?;
                let id: String = row.get(0);
                log.id = super::parse_id(&id)?;
                log.created_at = row.get(1);
                Ok(Some(log))
            }
            None => Ok(None),
        }
    }
}
