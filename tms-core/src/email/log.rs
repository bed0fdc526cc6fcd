//! Delivery log and webhook event merging.
//!
//! Each queue item owns at most one log row. The first event creates it;
//! later events fold into it field by field. Applying the same event twice
//! leaves the row unchanged, so provider re-deliveries are harmless.

use super::queue::QueueItem;
use crate::pulid::{prefix, Pulid};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogStatus {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Delivered => "Delivered",
            LogStatus::Opened => "Opened",
            LogStatus::Clicked => "Clicked",
            LogStatus::Bounced => "Bounced",
            LogStatus::Complained => "Complained",
            LogStatus::Unsubscribed => "Unsubscribed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            LogStatus::Delivered,
            LogStatus::Opened,
            LogStatus::Clicked,
            LogStatus::Bounced,
            LogStatus::Complained,
            LogStatus::Unsubscribed,
        ]
        .into_iter()
        .find(|st| st.as_str() == s)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BounceType {
    Hard,
    Soft,
    Technical,
}

/// An incoming delivery event, typically from a provider webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    #[serde(default)]
    pub organization_id: Pulid,
    #[serde(default)]
    pub business_unit_id: Pulid,
    pub queue_id: Pulid,
    #[serde(default)]
    pub message_id: String,
    pub status: LogStatus,
    /// Unix seconds the provider observed the event.
    pub occurred_at: i64,
    #[serde(default)]
    pub clicked_urls: Vec<String>,
    #[serde(default)]
    pub bounce_type: Option<BounceType>,
    #[serde(default)]
    pub bounce_reason: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Raw provider payload appended to the log's event history.
    #[serde(default)]
    pub payload: Option<Value>,
}

/// One delivery log per queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLog {
    pub id: Pulid,
    pub organization_id: Pulid,
    #[serde(default)]
    pub business_unit_id: Pulid,
    pub queue_id: Pulid,
    pub message_id: String,
    pub status: LogStatus,
    #[serde(default)]
    pub opened_at: Option<i64>,
    #[serde(default)]
    pub clicked_at: Option<i64>,
    #[serde(default)]
    pub clicked_urls: Vec<String>,
    #[serde(default)]
    pub bounced_at: Option<i64>,
    #[serde(default)]
    pub bounce_type: Option<BounceType>,
    #[serde(default)]
    pub bounce_reason: Option<String>,
    #[serde(default)]
    pub complained_at: Option<i64>,
    #[serde(default)]
    pub unsubscribed_at: Option<i64>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub webhook_events: Vec<Value>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl EmailLog {
    /// Log written when a provider accepts the message.
    pub fn delivered(item: &QueueItem, message_id: &str, now: i64) -> Self {
        Self {
            id: Pulid::new(prefix::EMAIL_LOG),
            organization_id: item.organization_id.clone(),
            business_unit_id: item.business_unit_id.clone(),
            queue_id: item.id.clone(),
            message_id: message_id.to_string(),
            status: LogStatus::Delivered,
            opened_at: None,
            clicked_at: None,
            clicked_urls: Vec::new(),
            bounced_at: None,
            bounce_type: None,
            bounce_reason: None,
            complained_at: None,
            unsubscribed_at: None,
            ip_address: None,
            user_agent: None,
            webhook_events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// First log for a queue item that has none yet.
    pub fn from_event(event: &LogEvent, now: i64) -> Self {
        let mut log = Self {
            id: Pulid::new(prefix::EMAIL_LOG),
            organization_id: event.organization_id.clone(),
            business_unit_id: event.business_unit_id.clone(),
            queue_id: event.queue_id.clone(),
            message_id: event.message_id.clone(),
            status: event.status,
            opened_at: None,
            clicked_at: None,
            clicked_urls: Vec::new(),
            bounced_at: None,
            bounce_type: None,
            bounce_reason: None,
            complained_at: None,
            unsubscribed_at: None,
            ip_address: None,
            user_agent: None,
            webhook_events: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        log.apply(event);
        log
    }

    /// Fold an event into the existing row.
    ///
    /// `updated_at` is left to the caller so that re-applying an identical
    /// event is observably a no-op.
    pub fn apply(&mut self, event: &LogEvent) {
        self.status = event.status;
        if self.message_id.is_empty() && !event.message_id.is_empty() {
            self.message_id = event.message_id.clone();
        }

        let at = Some(event.occurred_at);
        match event.status {
            LogStatus::Delivered => {}
            LogStatus::Opened => {
                self.opened_at = at;
                self.merge_client(event);
            }
            LogStatus::Clicked => {
                self.clicked_at = at;
                self.merge_client(event);
                for url in &event.clicked_urls {
                    if !self.clicked_urls.contains(url) {
                        self.clicked_urls.push(url.clone());
                    }
                }
            }
            LogStatus::Bounced => {
                self.bounced_at = at;
                if event.bounce_type.is_some() {
                    self.bounce_type = event.bounce_type;
                }
                if event.bounce_reason.is_some() {
                    self.bounce_reason = event.bounce_reason.clone();
                }
            }
            LogStatus::Complained => self.complained_at = at,
            LogStatus::Unsubscribed => self.unsubscribed_at = at,
        }

        if let Some(payload) = &event.payload {
            if !self.webhook_events.contains(payload) {
                self.webhook_events.push(payload.clone());
            }
        }
    }

    fn merge_client(&mut self, event: &LogEvent) {
        if event.ip_address.is_some() {
            self.ip_address = event.ip_address.clone();
        }
        if event.user_agent.is_some() {
            self.user_agent = event.user_agent.clone();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(status: LogStatus, at: i64) -> LogEvent {
        LogEvent {
            organization_id: Pulid::new("org"),
            business_unit_id: Pulid::nil(),
            queue_id: Pulid::new("q"),
            message_id: "msg-1".to_string(),
            status,
            occurred_at: at,
            clicked_urls: Vec::new(),
            bounce_type: None,
            bounce_reason: None,
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("Mail/1.0".to_string()),
            payload: Some(json!({"event": status.as_str(), "ts": at})),
        }
    }

    #[test]
    fn test_click_merges_urls_without_duplicates() {
        let mut ev = event(LogStatus::Clicked, 10);
        ev.clicked_urls = vec!["https://a".to_string(), "https://b".to_string()];
        let mut log = EmailLog::from_event(&ev, 10);

        let mut second = event(LogStatus::Clicked, 20);
        second.clicked_urls = vec!["https://b".to_string(), "https://c".to_string()];
        log.apply(&second);

        assert_eq!(log.clicked_at, Some(20));
        assert_eq!(log.clicked_urls, vec!["https://a", "https://b", "https://c"]);
        assert_eq!(log.webhook_events.len(), 2);
    }

    #[test]
    fn test_bounce_fields() {
        let mut log = EmailLog::from_event(&event(LogStatus::Opened, 5), 5);
        let mut ev = event(LogStatus::Bounced, 9);
        ev.bounce_type = Some(BounceType::Hard);
        ev.bounce_reason = Some("mailbox does not exist".to_string());
        log.apply(&ev);

        assert_eq!(log.status, LogStatus::Bounced);
        assert_eq!(log.opened_at, Some(5));
        assert_eq!(log.bounced_at, Some(9));
        assert_eq!(log.bounce_type, Some(BounceType::Hard));
        assert_eq!(log.bounce_reason.as_deref(), Some("mailbox does not exist"));
    }

    #[test]
    fn test_complaint_and_unsubscribe() {
        let mut log = EmailLog::from_event(&event(LogStatus::Complained, 3), 3);
        log.apply(&event(LogStatus::Unsubscribed, 4));
        assert_eq!(log.complained_at, Some(3));
        assert_eq!(log.unsubscribed_at, Some(4));
    }

    #[test]
    fn test_reapplying_event_is_noop() {
        let statuses = [
            LogStatus::Opened,
            LogStatus::Clicked,
            LogStatus::Bounced,
            LogStatus::Complained,
            LogStatus::Unsubscribed,
        ];
        for status in statuses {
            let mut ev = event(status, 42);
            ev.clicked_urls = vec!["https://x".to_string()];
            let mut log = EmailLog::from_event(&ev, 42);
            let once = log.clone();
            log.apply(&ev);
            assert_eq!(log, once, "{status}");
        }
    }
}
