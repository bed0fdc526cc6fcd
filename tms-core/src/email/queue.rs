//! Persistent email queue items and their status machine.

use super::message::AttachmentMeta;
use super::Metadata;
use crate::error::{FieldCode, MultiError};
use crate::pulid::Pulid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata key carrying the organization header value.
pub const META_ORGANIZATION_ID: &str = "organizationId";
/// Metadata key carrying the queue header value.
pub const META_QUEUE_ID: &str = "queueId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueStatus {
    Pending,
    Scheduled,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "Pending",
            QueueStatus::Scheduled => "Scheduled",
            QueueStatus::Processing => "Processing",
            QueueStatus::Sent => "Sent",
            QueueStatus::Failed => "Failed",
            QueueStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            QueueStatus::Pending,
            QueueStatus::Scheduled,
            QueueStatus::Processing,
            QueueStatus::Sent,
            QueueStatus::Failed,
            QueueStatus::Cancelled,
        ]
        .into_iter()
        .find(|st| st.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Sent | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Sort rank; lower is sent first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "High" => Some(Priority::High),
            "Medium" => Some(Priority::Medium),
            "Low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// One email waiting to be, being, or having been sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    #[serde(default)]
    pub id: Pulid,
    pub organization_id: Pulid,
    #[serde(default)]
    pub business_unit_id: Pulid,
    pub profile_id: Pulid,
    #[serde(default)]
    pub template_id: Option<Pulid>,
    pub to_addresses: Vec<String>,
    #[serde(default)]
    pub cc_addresses: Vec<String>,
    #[serde(default)]
    pub bcc_addresses: Vec<String>,
    pub subject: String,
    pub html_body: String,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    #[serde(default)]
    pub priority: Priority,
    pub status: QueueStatus,
    #[serde(default)]
    pub scheduled_at: Option<i64>,
    #[serde(default)]
    pub sent_at: Option<i64>,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

pub const DEFAULT_MAX_RETRIES: i32 = 3;

fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

impl QueueItem {
    pub fn new(organization_id: Pulid, profile_id: Pulid, to: Vec<String>, subject: &str) -> Self {
        Self {
            id: Pulid::nil(),
            organization_id,
            business_unit_id: Pulid::nil(),
            profile_id,
            template_id: None,
            to_addresses: to,
            cc_addresses: Vec::new(),
            bcc_addresses: Vec::new(),
            subject: subject.to_string(),
            html_body: String::new(),
            text_body: None,
            attachments: Vec::new(),
            priority: Priority::Medium,
            status: QueueStatus::Pending,
            scheduled_at: None,
            sent_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            message_id: None,
            metadata: Metadata::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Retries remain and the item was not cancelled.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries && self.status != QueueStatus::Cancelled
    }

    /// Scheduled and due at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.status == QueueStatus::Scheduled && self.scheduled_at.is_some_and(|at| at <= now)
    }

    /// Status a newly enqueued item starts in.
    pub fn initial_status(scheduled_at: Option<i64>, now: i64) -> QueueStatus {
        match scheduled_at {
            Some(at) if at > now => QueueStatus::Scheduled,
            _ => QueueStatus::Pending,
        }
    }

    pub fn check(&self) -> MultiError {
        let mut errs = MultiError::new();
        if self.organization_id.is_nil() {
            errs.add("organizationId", FieldCode::Required, "Organization ID is required");
        }
        if self.to_addresses.is_empty() {
            errs.add("toAddresses", FieldCode::Required, "At least one recipient is required");
        }
        for (field, list) in [
            ("toAddresses", &self.to_addresses),
            ("ccAddresses", &self.cc_addresses),
            ("bccAddresses", &self.bcc_addresses),
        ] {
            for addr in list.iter() {
                if !super::is_email(addr) {
                    errs.add(
                        field,
                        FieldCode::InvalidFormat,
                        format!("'{}' is not a valid email address", addr),
                    );
                }
            }
        }
        if self.subject.trim().is_empty() {
            errs.add("subject", FieldCode::Required, "Subject is required");
        }
        if self.html_body.is_empty() && self.text_body.as_deref().unwrap_or("").is_empty() {
            errs.add("htmlBody", FieldCode::Required, "An HTML or text body is required");
        }
        if self.max_retries < 0 {
            errs.add("maxRetries", FieldCode::OutOfRange, "Max retries cannot be negative");
        }
        errs
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> QueueItem {
        let mut q = QueueItem::new(
            Pulid::new("org"),
            Pulid::new("prof"),
            vec!["to@example.com".to_string()],
            "Hello",
        );
        q.html_body = "<p>Hello</p>".to_string();
        q
    }

    #[test]
    fn test_can_retry() {
        let mut q = item();
        q.max_retries = 2;
        assert!(q.can_retry());
        q.retry_count = 2;
        assert!(!q.can_retry());
        q.retry_count = 0;
        q.status = QueueStatus::Cancelled;
        assert!(!q.can_retry());
    }

    #[test]
    fn test_initial_status_and_due() {
        assert_eq!(QueueItem::initial_status(None, 100), QueueStatus::Pending);
        assert_eq!(QueueItem::initial_status(Some(100), 100), QueueStatus::Pending);
        assert_eq!(QueueItem::initial_status(Some(101), 100), QueueStatus::Scheduled);

        let mut q = item();
        q.status = QueueStatus::Scheduled;
        q.scheduled_at = Some(50);
        assert!(q.is_due(50));
        assert!(!q.is_due(49));
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_check_recipients_and_body() {
        assert!(item().check().is_empty());
        let mut q = item();
        q.to_addresses = vec!["bad".to_string()];
        q.html_body.clear();
        let errs = q.check();
        assert!(errs.has_field("toAddresses"));
        assert!(errs.has_field("htmlBody"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(QueueStatus::parse("Processing"), Some(QueueStatus::Processing));
        assert_eq!(serde_json::to_string(&QueueStatus::Sent).unwrap(), "\"Sent\"");
        assert!(QueueStatus::Failed.is_terminal());
        assert!(!QueueStatus::Pending.is_terminal());
    }
}
