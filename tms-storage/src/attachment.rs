//! Attachment storage.
//!
//! Callers upload attachments as `data:` URLs or bare base64. The handler
//! stores the bytes under `org/bu/<uuid>/<file name>` and hands back
//! [`AttachmentMeta`] references that travel with the queue item.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use tms_core::email::{AttachmentMeta, AttachmentPayload};
use tms_core::{EmailError, FieldCode, MultiError, Pulid, StorageError, TmsResult};

pub const MAX_ATTACHMENTS: usize = 10;
pub const MAX_TOTAL_SIZE: i64 = 25 * 1024 * 1024;

/// Limits every attachment set must satisfy before it is stored or sent.
pub fn validate_attachments(metas: &[AttachmentMeta]) -> TmsResult<()> {
    let mut errors = MultiError::new();

    if metas.len() > MAX_ATTACHMENTS {
        errors.add(
            "attachments",
            FieldCode::OutOfRange,
            format!("at most {} attachments are allowed", MAX_ATTACHMENTS),
        );
    }

    let mut total: i64 = 0;
    for (i, meta) in metas.iter().enumerate() {
        if meta.file_name.trim().is_empty() {
            errors.add(
                format!("attachments[{}].fileName", i),
                FieldCode::Required,
                "file name is required",
            );
        }
        if meta.size <= 0 {
            errors.add(
                format!("attachments[{}].size", i),
                FieldCode::OutOfRange,
                "size must be positive",
            );
        }
        total = total.saturating_add(meta.size.max(0));
    }

    if total > MAX_TOTAL_SIZE {
        errors.add(
            "attachments",
            FieldCode::OutOfRange,
            format!("total size {} exceeds {} bytes", total, MAX_TOTAL_SIZE),
        );
    }

    errors.into_result().map_err(Into::into)
}

/// Decode a `data:<type>;base64,<payload>` URL or bare base64.
///
/// Returns the bytes and the content type embedded in the URL, if any.
pub fn decode_payload(data: &str) -> Result<(Vec<u8>, Option<String>), String> {
    let (content_type, encoded) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest
                .split_once(',')
                .ok_or_else(|| "data URL has no payload".to_string())?;
            let media = header
                .strip_suffix(";base64")
                .ok_or_else(|| "data URL is not base64 encoded".to_string())?;
            let media = (!media.is_empty()).then(|| media.to_string());
            (media, body)
        }
        None => (None, data),
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    Ok((bytes, content_type))
}

#[async_trait]
pub trait AttachmentHandler: Send + Sync {
    fn validate(&self, metas: &[AttachmentMeta]) -> TmsResult<()> {
        validate_attachments(metas)
    }

    async fn get_data(&self, meta: &AttachmentMeta, organization_id: &Pulid) -> TmsResult<Vec<u8>>;

    async fn save(
        &self,
        payloads: &[AttachmentPayload],
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<Vec<AttachmentMeta>>;

    async fn delete(&self, metas: &[AttachmentMeta], organization_id: &Pulid) -> TmsResult<()>;
}

// ============================================================================
// IN-MEMORY HANDLER
// ============================================================================

/// Keeps attachment blobs in process memory.
#[derive(Debug, Default)]
pub struct InMemoryAttachmentHandler {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryAttachmentHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn storage_key(organization_id: &Pulid, business_unit_id: &Pulid, file_name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            organization_id,
            business_unit_id,
            uuid::Uuid::now_v7(),
            file_name
        )
    }

    fn owns(meta: &AttachmentMeta, organization_id: &Pulid) -> bool {
        meta.storage_key
            .strip_prefix(organization_id.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[async_trait]
impl AttachmentHandler for InMemoryAttachmentHandler {
    async fn get_data(&self, meta: &AttachmentMeta, organization_id: &Pulid) -> TmsResult<Vec<u8>> {
        if !Self::owns(meta, organization_id) {
            return Err(StorageError::not_found("attachment", &meta.storage_key).into());
        }
        self.blobs
            .get(&meta.storage_key)
            .map(|blob| blob.value().clone())
            .ok_or_else(|| StorageError::not_found("attachment", &meta.storage_key).into())
    }

    async fn save(
        &self,
        payloads: &[AttachmentPayload],
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<Vec<AttachmentMeta>> {
        let mut decoded = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let (bytes, embedded_type) =
                decode_payload(&payload.data).map_err(|reason| EmailError::ConvertAttachments {
                    reason: format!("{}: {}", payload.file_name, reason),
                })?;
            let content_type = if payload.content_type.is_empty() {
                embedded_type.unwrap_or_else(|| "application/octet-stream".to_string())
            } else {
                payload.content_type.clone()
            };
            decoded.push((payload, content_type, bytes));
        }

        let metas: Vec<AttachmentMeta> = decoded
            .iter()
            .map(|(payload, content_type, bytes)| AttachmentMeta {
                file_name: payload.file_name.clone(),
                content_type: content_type.clone(),
                size: bytes.len() as i64,
                storage_key: Self::storage_key(
                    organization_id,
                    business_unit_id,
                    &payload.file_name,
                ),
                content_id: payload.content_id.clone(),
            })
            .collect();
        validate_attachments(&metas)?;

        for (meta, (_, _, bytes)) in metas.iter().zip(decoded) {
            self.blobs.insert(meta.storage_key.clone(), bytes);
        }
        Ok(metas)
    }

    async fn delete(&self, metas: &[AttachmentMeta], organization_id: &Pulid) -> TmsResult<()> {
        for meta in metas.iter().filter(|m| Self::owns(m, organization_id)) {
            self.blobs.remove(&meta.storage_key);
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
