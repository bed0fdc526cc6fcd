//! PostgreSQL implementations of the storage traits.
//!
//! Sequence rows and sessions are stored column by column. Email records keep
//! their queried columns next to a JSONB `data` column holding the full
//! record, which is what reads deserialize.

pub mod email;
pub mod format;
pub mod sequence;
pub mod session;

pub use email::PgEmailStore;
pub use format::PgFormatOverrides;
pub use sequence::PgSequenceAllocator;
pub use session::PgSessionStore;

use crate::db::DbClient;
use tms_core::{Pulid, StorageError, TmsError, TmsResult};
use tokio_postgres::error::SqlState;

/// Borrow a pooled connection, reporting pool failures as storage errors.
pub(crate) async fn conn(db: &DbClient) -> TmsResult<deadpool_postgres::Object> {
    db.pool().get().await.map_err(|e| {
        StorageError::Pool {
            reason: e.to_string(),
        }
        .into()
    })
}

pub(crate) fn query_failed(err: tokio_postgres::Error) -> TmsError {
    tracing::error!("Database query failed: {:?}", err);
    StorageError::QueryFailed {
        reason: err.to_string(),
    }
    .into()
}

pub(crate) fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

pub(crate) fn is_serialization_failure(err: &tokio_postgres::Error) -> bool {
    matches!(
        err.code(),
        Some(code) if *code == SqlState::T_R_SERIALIZATION_FAILURE
            || *code == SqlState::T_R_DEADLOCK_DETECTED
    )
}

/// Nil identifiers are stored as SQL NULL.
pub(crate) fn nullable(id: &Pulid) -> Option<&str> {
    if id.is_nil() {
        None
    } else {
        Some(id.as_str())
    }
}

pub(crate) fn parse_id(raw: &str) -> TmsResult<Pulid> {
    raw.parse().map_err(|e: tms_core::PulidError| {
        StorageError::QueryFailed {
            reason: format!("stored identifier {:?} is invalid: {}", raw, e),
        }
        .into()
    })
}
