//! Builds provider messages from a profile and a queue item.

use crate::constants::{HEADER_ORGANIZATION_ID, HEADER_QUEUE_ID};
use std::collections::BTreeMap;
use std::sync::Arc;
use tms_core::email::{
    Attachment, EmailProfile, Mailbox, Message, QueueItem, META_ORGANIZATION_ID, META_QUEUE_ID,
};
use tms_core::{EmailError, TmsResult};
use tms_storage::AttachmentHandler;

#[derive(Clone)]
pub struct MessageBuilder {
    attachments: Arc<dyn AttachmentHandler>,
}

impl MessageBuilder {
    pub fn new(attachments: Arc<dyn AttachmentHandler>) -> Self {
        Self { attachments }
    }

    pub async fn build(&self, profile: &EmailProfile, item: &QueueItem) -> TmsResult<Message> {
        let mut headers = BTreeMap::new();
        for (key, header) in [
            (META_ORGANIZATION_ID, HEADER_ORGANIZATION_ID),
            (META_QUEUE_ID, HEADER_QUEUE_ID),
        ] {
            if let Some(value) = item.metadata.get(key).and_then(|v| v.as_str()) {
                headers.insert(header.to_string(), value.to_string());
            }
        }

        Ok(Message {
            from: Mailbox::new(&profile.from_address, &profile.from_name),
            to: item.to_addresses.clone(),
            cc: item.cc_addresses.clone(),
            bcc: item.bcc_addresses.clone(),
            subject: item.subject.clone(),
            html: item.html_body.clone(),
            text: item.text_body.clone().filter(|t| !t.is_empty()),
            reply_to: profile.reply_to.clone().filter(|r| !r.is_empty()),
            headers,
            priority: item.priority,
            attachments: self.resolve_attachments(item).await?,
        })
    }

    async fn resolve_attachments(&self, item: &QueueItem) -> TmsResult<Vec<Attachment>> {
        if item.attachments.is_empty() {
            return Ok(Vec::new());
        }

        let convert = |reason: String| EmailError::ConvertAttachments { reason };
        self.attachments
            .validate(&item.attachments)
            .map_err(|e| convert(e.to_string()))?;

        let mut resolved = Vec::with_capacity(item.attachments.len());
        for meta in &item.attachments {
            let data = self
                .attachments
                .get_data(meta, &item.organization_id)
                .await
                .map_err(|e| convert(format!("{}: {}", meta.file_name, e)))?;
            resolved.push(Attachment {
                file_name: meta.file_name.clone(),
                content_type: meta.content_type.clone(),
                data,
                content_id: meta.content_id.clone(),
            });
        }
        Ok(resolved)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tms_core::email::{AttachmentMeta, AttachmentPayload};
    use tms_core::{Pulid, TmsError};
    use tms_storage::InMemoryAttachmentHandler;

    fn profile(org: &Pulid) -> EmailProfile {
        let mut p = EmailProfile::smtp(org.clone(), "Primary", "smtp.example.com", "ops@example.com");
        p.from_name = "Ops".to_string();
        p.reply_to = Some("support@example.com".to_string());
        p
    }

    #[tokio::test]
    async fn test_build_injects_tenant_headers() {
        let handler = Arc::new(InMemoryAttachmentHandler::new());
        let builder = MessageBuilder::new(handler.clone());
        let org = Pulid::new("org");
        let mut item = QueueItem::new(
            org.clone(),
            Pulid::new("ep"),
            vec!["ann@example.com".to_string()],
            "Hello",
        );
        item.html_body = "<p>Hi</p>".to_string();
        item.metadata.insert(META_ORGANIZATION_ID.to_string(), json!(org.as_str()));
        item.metadata.insert(META_QUEUE_ID.to_string(), json!("eq_1"));
        item.attachments = handler
            .save(
                &[AttachmentPayload {
                    file_name: "a.txt".to_string(),
                    content_type: "text/plain".to_string(),
                    data: "data:text/plain;base64,YWJj".to_string(),
                    content_id: None,
                }],
                &org,
                &Pulid::nil(),
            )
            .await
            .unwrap();

        let msg = builder.build(&profile(&org), &item).await.unwrap();
        assert_eq!(msg.from.name.as_deref(), Some("Ops"));
        assert_eq!(msg.headers.get(HEADER_ORGANIZATION_ID).map(String::as_str), Some(org.as_str()));
        assert_eq!(msg.headers.get(HEADER_QUEUE_ID).map(String::as_str), Some("eq_1"));
        assert_eq!(msg.reply_to.as_deref(), Some("support@example.com"));
        assert_eq!(msg.attachments[0].data, b"abc".to_vec());
        assert_eq!(msg.text, None);
    }

    #[tokio::test]
    async fn test_missing_attachment_fails_conversion() {
        let builder = MessageBuilder::new(Arc::new(InMemoryAttachmentHandler::new()));
        let org = Pulid::new("org");
        let mut item = QueueItem::new(org.clone(), Pulid::new("ep"), vec![], "Hello");
        item.attachments = vec![AttachmentMeta {
            file_name: "gone.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 10,
            storage_key: "org/missing".to_string(),
            content_id: None,
        }];

        let err = builder.build(&profile(&org), &item).await.unwrap_err();
        assert!(matches!(
            err.root(),
            TmsError::Email(EmailError::ConvertAttachments { .. })
        ));
    }
}
