//! Authenticated browser sessions.

use crate::pulid::Pulid;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Absolute session lifetime measured from creation, independent of any
/// sliding expiry extension.
pub const MAX_SESSION_AGE: Duration = Duration::from_secs(72 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    Active,
    Revoked,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "Active",
            SessionStatus::Revoked => "Revoked",
            SessionStatus::Expired => "Expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(SessionStatus::Active),
            "Revoked" => Some(SessionStatus::Revoked),
            "Expired" => Some(SessionStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Pulid,
    pub user_id: Pulid,
    pub organization_id: Pulid,
    pub business_unit_id: Pulid,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_active_at: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub status: SessionStatus,
}

impl Session {
    /// False once `created_at + MAX_SESSION_AGE` has passed.
    pub fn is_within_max_age(&self, now: i64) -> bool {
        let max = MAX_SESSION_AGE.as_secs() as i64;
        self.created_at.saturating_add(max) >= now
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(created_at: i64) -> Session {
        Session {
            id: Pulid::new("sess"),
            user_id: Pulid::new("usr"),
            organization_id: Pulid::new("org"),
            business_unit_id: Pulid::new("bu"),
            created_at,
            expires_at: created_at + 3600,
            last_active_at: created_at,
            ip_address: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            status: SessionStatus::Active,
        }
    }

    #[test]
    fn test_max_age_boundary() {
        let now = 1_000_000;
        assert!(session(now - 72 * 3600).is_within_max_age(now));
        assert!(!session(now - 73 * 3600).is_within_max_age(now));
    }

    #[test]
    fn test_expiry() {
        let s = session(0);
        assert!(!s.is_expired(3599));
        assert!(s.is_expired(3600));
    }
}
