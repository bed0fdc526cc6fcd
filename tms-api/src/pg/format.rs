//! Format overrides in PostgreSQL.

use super::{conn, nullable, query_failed};
use crate::db::DbClient;
use async_trait::async_trait;
use tms_core::sequence::{FormatConfig, SequenceKind};
use tms_core::{unix_now, Pulid, StorageError, TmsResult};
use tms_storage::FormatOverrideStore;

#[derive(Clone)]
pub struct PgFormatOverrides {
    db: DbClient,
}

impl PgFormatOverrides {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    async fn lookup(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<Option<FormatConfig>> {
        let client = conn(&self.db).await?;
        let row = client
            .query_opt(
                "SELECT format FROM sequence_formats \
                 WHERE sequence_type = $1 AND organization_id = $2 \
                   AND business_unit_id IS NOT DISTINCT FROM $3",
                &[
                    &kind.as_str(),
                    &organization_id.as_str(),
                    &nullable(business_unit_id),
                ],
            )
            .await
            .map_err(query_failed)?;

        match row {
            Some(row) => {
                let value: serde_json::Value = row.get(0);
                let config = serde_json::from_value(value).map_err(|e| StorageError::QueryFailed {
                    reason: format!("stored format for {} is invalid: {}", kind, e),
                })?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    /// Store an override. A nil business unit makes it organization-wide.
    pub async fn save(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
        format: &FormatConfig,
    ) -> TmsResult<()> {
        let value = serde_json::to_value(format).map_err(|e| StorageError::QueryFailed {
            reason: e.to_string(),
        })?;
        let client = conn(&self.db).await?;
        let updated = client
            .execute(
                "UPDATE sequence_formats SET format = $4, updated_at = $5 \
                 WHERE sequence_type = $1 AND organization_id = $2 \
                   AND business_unit_id IS NOT DISTINCT FROM $3",
                &[
                    &kind.as_str(),
                    &organization_id.as_str(),
                    &nullable(business_unit_id),
                    &value,
                    &unix_now(),
                ],
            )
            .await
            .map_err(query_failed)?;
        if updated == 0 {
            client
                .execute(
                    "INSERT INTO sequence_formats \
                     (sequence_type, organization_id, business_unit_id, format, updated_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                    &[
                        &kind.as_str(),
                        &organization_id.as_str(),
                        &nullable(business_unit_id),
                        &value,
                        &unix_now(),
                    ],
                )
                .await
                .map_err(query_failed)?;
        }
        Ok(())
    }
}

#[async_trait]
impl FormatOverrideStore for PgFormatOverrides {
    async fn business_unit_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<Option<FormatConfig>> {
        if business_unit_id.is_nil() {
            return Ok(None);
        }
        self.lookup(kind, organization_id, business_unit_id).await
    }

    async fn organization_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
    ) -> TmsResult<Option<FormatConfig>> {
        self.lookup(kind, organization_id, &Pulid::nil()).await
    }
}
