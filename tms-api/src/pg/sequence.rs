//! Sequence counters in PostgreSQL.

use super::{conn, is_serialization_failure, nullable, query_failed};
use crate::db::DbClient;
use async_trait::async_trait;
use tms_core::pulid::prefix;
use tms_core::{unix_now, Pulid, SequenceError, StorageError, TmsError, TmsResult};
use tms_storage::{SequenceAllocator, SequenceKey};
use tokio_postgres::{IsolationLevel, Transaction};

const SELECT_ROW: &str = "SELECT current_sequence, version FROM sequences \
     WHERE sequence_type = $1 AND organization_id = $2 \
       AND business_unit_id IS NOT DISTINCT FROM $3 \
       AND year = $4 AND month = $5 \
     FOR UPDATE";

const INSERT_ROW: &str = "INSERT INTO sequences \
     (id, sequence_type, organization_id, business_unit_id, year, month, \
      current_sequence, version, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $7, $7) \
     ON CONFLICT DO NOTHING";

const UPDATE_ROW: &str = "UPDATE sequences \
     SET current_sequence = current_sequence + $1, version = version + 1, updated_at = $2 \
     WHERE sequence_type = $3 AND organization_id = $4 \
       AND business_unit_id IS NOT DISTINCT FROM $5 \
       AND year = $6 AND month = $7 AND version = $8";

/// One optimistic allocation per serializable transaction.
#[derive(Clone)]
pub struct PgSequenceAllocator {
    db: DbClient,
}

impl PgSequenceAllocator {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

fn conflict(key: &SequenceKey) -> TmsError {
    SequenceError::UpdateConflict {
        key: key.to_string(),
    }
    .into()
}

/// Serialization failures are lost races, the same as a stale version.
fn classify(key: &SequenceKey, err: tokio_postgres::Error) -> TmsError {
    if is_serialization_failure(&err) {
        conflict(key)
    } else {
        query_failed(err)
    }
}

async fn select_row(tx: &Transaction<'_>, key: &SequenceKey) -> Result<Option<(i64, i64)>, tokio_postgres::Error> {
    let row = tx
        .query_opt(
            SELECT_ROW,
            &[
                &key.kind.as_str(),
                &key.organization_id.as_str(),
                &nullable(&key.business_unit_id),
                &key.year,
                &key.month,
            ],
        )
        .await?;
    Ok(row.map(|r| (r.get(0), r.get(1))))
}

#[async_trait]
impl SequenceAllocator for PgSequenceAllocator {
    async fn try_allocate(&self, key: &SequenceKey, count: i64) -> TmsResult<i64> {
        let mut client = conn(&self.db).await?;
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::Serializable)
            .start()
            .await
            .map_err(|e| {
                TmsError::from(StorageError::TransactionFailed {
                    reason: e.to_string(),
                })
            })?;

        let now = unix_now();
        let witnessed = match select_row(&tx, key).await.map_err(|e| classify(key, e))? {
            Some(row) => row,
            None => {
                let id = Pulid::new(prefix::SEQUENCE);
                tx.execute(
                    INSERT_ROW,
                    &[
                        &id.as_str(),
                        &key.kind.as_str(),
                        &key.organization_id.as_str(),
                        &nullable(&key.business_unit_id),
                        &key.year,
                        &key.month,
                        &now,
                    ],
                )
                .await
                .map_err(|e| classify(key, e))?;
                select_row(&tx, key)
                    .await
                    .map_err(|e| classify(key, e))?
                    .ok_or_else(|| conflict(key))?
            }
        };
        let (current, version) = witnessed;

        let affected = tx
            .execute(
                UPDATE_ROW,
                &[
                    &count,
                    &now,
                    &key.kind.as_str(),
                    &key.organization_id.as_str(),
                    &nullable(&key.business_unit_id),
                    &key.year,
                    &key.month,
                    &version,
                ],
            )
            .await
            .map_err(|e| classify(key, e))?;

        if affected == 0 {
            if let Err(err) = tx.rollback().await {
                tracing::debug!(key = %key, error = %err, "rollback after conflict failed");
            }
            return Err(conflict(key));
        }

        tx.commit().await.map_err(|e| classify(key, e))?;
        Ok(current + 1)
    }
}

// ============================================================================
// TESTS
// ============================================================================
