//! Session refresh.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tms_core::{unix_now, Pulid, Session, SessionError, SessionStatus, MAX_SESSION_AGE};

/// How a refresh treats an otherwise valid session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Sliding window added to `now` on every refresh.
    pub idle_timeout: Duration,
    /// Reject refreshes from an address other than the one recorded.
    pub pin_ip: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(24 * 60 * 60),
            pin_ip: false,
        }
    }
}

impl SessionPolicy {
    /// Validate `session` at `now` and slide its expiry.
    ///
    /// The new expiry never passes `created_at + MAX_SESSION_AGE`.
    pub fn refresh(
        &self,
        mut session: Session,
        ip: &str,
        user_agent: &str,
        now: i64,
    ) -> Result<Session, SessionError> {
        if session.status != SessionStatus::Active {
            return Err(SessionError::NotActive);
        }
        if session.is_expired(now) {
            return Err(SessionError::Expired);
        }
        if self.pin_ip && !session.ip_address.is_empty() && session.ip_address != ip {
            return Err(SessionError::IpMismatch);
        }

        let cap = session
            .created_at
            .saturating_add(MAX_SESSION_AGE.as_secs() as i64);
        let slid = now.saturating_add(self.idle_timeout.as_secs() as i64);
        session.expires_at = slid.min(cap);
        session.last_active_at = now;
        if !ip.is_empty() {
            session.ip_address = ip.to_string();
        }
        if !user_agent.is_empty() {
            session.user_agent = user_agent.to_string();
        }
        Ok(session)
    }
}

#[async_trait]
pub trait SessionService: Send + Sync {
    /// Look up, validate and extend a session.
    async fn refresh_session(
        &self,
        id: &Pulid,
        ip: &str,
        user_agent: &str,
    ) -> Result<Session, SessionError>;
}

/// Sessions held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<Pulid, Session>,
    policy: SessionPolicy,
}

impl InMemorySessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            policy,
        }
    }

    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn revoke(&self, id: &Pulid) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.status = SessionStatus::Revoked;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &Pulid) -> Option<Session> {
        self.sessions.get(id).map(|s| s.value().clone())
    }
}

#[async_trait]
impl SessionService for InMemorySessionStore {
    async fn refresh_session(
        &self,
        id: &Pulid,
        ip: &str,
        user_agent: &str,
    ) -> Result<Session, SessionError> {
        let mut entry = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        let refreshed = self
            .policy
            .refresh(entry.value().clone(), ip, user_agent, unix_now())?;
        *entry = refreshed.clone();
        Ok(refreshed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
