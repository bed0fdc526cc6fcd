//! Sessions in PostgreSQL.

use super::parse_id;
use crate::db::DbClient;
use async_trait::async_trait;
use tms_core::{unix_now, Pulid, Session, SessionError, SessionStatus};
use tms_storage::{SessionPolicy, SessionService};
use tokio_postgres::Row;

const SESSION_COLUMNS: &str = "id, user_id, organization_id, business_unit_id, created_at, \
     expires_at, last_active_at, ip_address, user_agent, status";

#[derive(Clone)]
pub struct PgSessionStore {
    db: DbClient,
    policy: SessionPolicy,
}

fn storage(err: impl std::fmt::Display) -> SessionError {
    SessionError::Storage {
        reason: err.to_string(),
    }
}

fn row_to_session(row: &Row) -> Result<Session, SessionError> {
    let id = |idx: usize| parse_id(row.get::<_, &str>(idx)).map_err(storage);
    let status: &str = row.get(9);
    Ok(Session {
        id: id(0)?,
        user_id: id(1)?,
        organization_id: id(2)?,
        business_unit_id: id(3)?,
        created_at: row.get(4),
        expires_at: row.get(5),
        last_active_at: row.get(6),
        ip_address: row.get(7),
        user_agent: row.get(8),
        status: SessionStatus::parse(status)
            .ok_or_else(|| storage(format!("unknown session status {:?}", status)))?,
    })
}

impl PgSessionStore {
    pub fn new(db: DbClient, policy: SessionPolicy) -> Self {
        Self { db, policy }
    }

    pub async fn insert(&self, session: &Session) -> Result<(), SessionError> {
        let client = self.db.pool().get().await.map_err(storage)?;
        client
            .execute(
                &format!(
                    "INSERT INTO sessions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                    SESSION_COLUMNS
                ),
                &[
                    &session.id.as_str(),
                    &session.user_id.as_str(),
                    &session.organization_id.as_str(),
                    &session.business_unit_id.as_str(),
                    &session.created_at,
                    &session.expires_at,
                    &session.last_active_at,
                    &session.ip_address,
                    &session.user_agent,
                    &session.status.as_str(),
                ],
            )
            .await
            .map_err(storage)?;
        Ok(())
    }

    /// Mark a session revoked. Returns false when it does not exist.
    pub async fn revoke(&self, id: &Pulid) -> Result<bool, SessionError> {
        let client = self.db.pool().get().await.map_err(storage)?;
        let updated = client
            .execute(
                "UPDATE sessions SET status = $2 WHERE id = $1",
                &[&id.as_str(), &SessionStatus::Revoked.as_str()],
            )
            .await
            .map_err(storage)?;
        Ok(updated > 0)
    }
}

#[async_trait]
impl SessionService for PgSessionStore {
    async fn refresh_session(
        &self,
        id: &Pulid,
        ip: &str,
        user_agent: &str,
    ) -> Result<Session, SessionError> {
        let mut client = self.db.pool().get().await.map_err(storage)?;
        let tx = client.transaction().await.map_err(storage)?;

        let row = tx
            .query_opt(
                &format!("SELECT {} FROM sessions WHERE id = $1 FOR UPDATE", SESSION_COLUMNS),
                &[&id.as_str()],
            )
            .await
            .map_err(storage)?
            .ok_or(SessionError::NotFound)?;
        let session = row_to_session(&row)?;
        let refreshed = self.policy.refresh(session, ip, user_agent, unix_now())?;

        tx.execute(
            "UPDATE sessions SET expires_at = $2, last_active_at = $3, ip_address = $4, \
             user_agent = $5 WHERE id = $1",
            &[
                &id.as_str(),
                &refreshed.expires_at,
                &refreshed.last_active_at,
                &refreshed.ip_address,
                &refreshed.user_agent,
            ],
        )
        .await
        .map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        Ok(refreshed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
