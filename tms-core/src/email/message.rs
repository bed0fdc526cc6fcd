//! Provider-agnostic outbound message.

use super::queue::Priority;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to an attachment held in external storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    /// Storage key the attachment handler resolves.
    pub storage_key: String,
    #[serde(default)]
    pub content_id: Option<String>,
}

/// Attachment content supplied by a caller before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    pub file_name: String,
    pub content_type: String,
    /// `data:` URL or bare base64 content.
    pub data: String,
    #[serde(default)]
    pub content_id: Option<String>,
}

/// Attachment bytes resolved for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub content_id: Option<String>,
}

impl Attachment {
    pub fn is_inline(&self) -> bool {
        self.content_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Mailbox {
    pub fn new(address: &str, name: &str) -> Self {
        Self {
            address: address.to_string(),
            name: if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            },
        }
    }
}

/// Message handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Mailbox,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub reply_to: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub priority: Priority,
    pub attachments: Vec<Attachment>,
}
