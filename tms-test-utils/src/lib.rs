//! TMS Test Utilities
//!
//! Shared test infrastructure for the TMS workspace:
//! - Proptest generators for identifiers, format configs and secrets
//! - Fixtures for tenants, profiles and queue items
//! - Mock email provider, attachment handler and random source
//! - Assertions over the error taxonomy

pub use tms_core::email::{
    AttachmentMeta, AttachmentPayload, EmailProfile, EmailProvider, Message, ProviderConfig,
    ProviderType, QueueItem,
};
pub use tms_core::sequence::{FormatConfig, RandomSource, SequenceKind};
pub use tms_core::{EmailError, ErrorKind, Pulid, TenantContext, TmsError, TmsResult};
pub use tms_storage::{AttachmentHandler, InMemoryAttachmentHandler};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// MOCK PROVIDERS
// ============================================================================

/// Email provider that records messages instead of delivering them.
///
/// A failure set with [`MockEmailProvider::set_failure`] applies to both
/// `send` and `test_connection` until cleared.
#[derive(Debug)]
pub struct MockEmailProvider {
    provider_type: ProviderType,
    failure: Mutex<Option<String>>,
    sent: Mutex<Vec<Message>>,
    connection_tests: AtomicUsize,
}

impl MockEmailProvider {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            connection_tests: AtomicUsize::new(0),
        }
    }

    /// Make subsequent calls fail with `reason`, or succeed again with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.failure.lock().unwrap() = reason.map(str::to_string);
    }

    /// Messages accepted so far, oldest first.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn connection_tests(&self) -> usize {
        self.connection_tests.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), EmailError> {
        match self.failure.lock().unwrap().as_ref() {
            Some(reason) => Err(EmailError::Provider {
                provider_type: self.provider_type.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn send(&self, _config: &ProviderConfig, message: &Message) -> Result<String, EmailError> {
        self.check_failure()?;
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(format!("<mock-{}-{}@tms.test>", sent.len(), uuid::Uuid::now_v7()))
    }

    async fn test_connection(&self, _config: &ProviderConfig) -> Result<(), EmailError> {
        self.connection_tests.fetch_add(1, Ordering::SeqCst);
        self.check_failure()
    }
}

/// Attachment handler backed by memory with switchable fetch and delete
/// failures.
#[derive(Debug, Default)]
pub struct MockAttachmentHandler {
    inner: InMemoryAttachmentHandler,
    fail_fetch: AtomicBool,
    fail_delete: AtomicBool,
    deletes: AtomicUsize,
}

impl MockAttachmentHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Number of `delete` calls, including failed ones.
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl AttachmentHandler for MockAttachmentHandler {
    async fn get_data(&self, meta: &AttachmentMeta, organization_id: &Pulid) -> TmsResult<Vec<u8>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(tms_core::StorageError::not_found("attachment", &meta.storage_key).into());
        }
        self.inner.get_data(meta, organization_id).await
    }

    async fn save(
        &self,
        payloads: &[AttachmentPayload],
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<Vec<AttachmentMeta>> {
        self.inner.save(payloads, organization_id, business_unit_id).await
    }

    async fn delete(&self, metas: &[AttachmentMeta], organization_id: &Pulid) -> TmsResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(EmailError::ConvertAttachments {
                reason: "object store unavailable".to_string(),
            }
            .into());
        }
        self.inner.delete(metas, organization_id).await
    }
}

/// Random source that cycles through a fixed digit string.
#[derive(Debug, Clone)]
pub struct FixedRandom {
    digits: String,
}

impl FixedRandom {
    /// `digits` must be non-empty and contain only ASCII digits.
    pub fn new(digits: &str) -> Self {
        assert!(
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
            "FixedRandom needs decimal digits"
        );
        Self {
            digits: digits.to_string(),
        }
    }
}

impl RandomSource for FixedRandom {
    fn digits(&self, count: usize) -> String {
        self.digits.chars().cycle().take(count).collect()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TMS values.

    use super::*;
    use proptest::prelude::*;

    /// Pulid with the given prefix built from arbitrary UUID bytes.
    pub fn arb_pulid(prefix: &'static str) -> impl Strategy<Value = Pulid> {
        any::<[u8; 16]>().prop_map(move |bytes| Pulid::from_uuid(prefix, uuid::Uuid::from_bytes(bytes)))
    }

    pub fn arb_sequence_kind() -> impl Strategy<Value = SequenceKind> {
        prop_oneof![
            Just(SequenceKind::ProNumber),
            Just(SequenceKind::Consolidation),
            Just(SequenceKind::Invoice),
            Just(SequenceKind::WorkOrder),
        ]
    }

    /// Valid, non-custom format configurations.
    pub fn arb_format_config() -> impl Strategy<Value = FormatConfig> {
        (
            "[A-Z]{1,4}",
            proptest::option::of(prop_oneof![Just(2u8), Just(4u8)]),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            1u8..=10,
            proptest::option::of("[0-9]{2}"),
            proptest::option::of(1u8..=10),
            any::<bool>(),
            proptest::option::of(prop_oneof![Just("-"), Just("_"), Just("/")]),
        )
            .prop_map(
                |(prefix, year, month, week, day, seq, loc, rand, check, sep)| FormatConfig {
                    prefix,
                    include_year: year.is_some(),
                    year_digits: year.unwrap_or(2),
                    include_month: month,
                    include_week_number: week,
                    include_day: day,
                    sequence_digits: seq,
                    include_location_code: loc.is_some(),
                    location_code: loc.unwrap_or_default(),
                    include_random_digits: rand.is_some(),
                    random_digits_count: rand.unwrap_or(0),
                    include_check_digit: check,
                    use_separators: sep.is_some(),
                    separator_char: sep.unwrap_or("-").to_string(),
                    ..FormatConfig::default()
                },
            )
    }

    /// Secrets as users type them, including the empty string.
    pub fn arb_plaintext() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[ -~]{1,64}",
            ".{1,32}",
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made values for common scenarios.

    use super::*;

    /// Tenant with organization, business unit and user set.
    pub fn test_tenant() -> TenantContext {
        TenantContext::new(Pulid::new("org"), Pulid::new("bu"), Pulid::new("usr"))
    }

    /// Active SMTP profile with plain-auth credentials, not yet persisted.
    pub fn test_profile(tenant: &TenantContext) -> EmailProfile {
        let mut profile = EmailProfile::smtp(
            tenant.organization_id.clone(),
            "Primary",
            "smtp.example.com",
            "dispatch@example.com",
        );
        profile.business_unit_id = tenant.business_unit_id.clone();
        profile.username = "dispatch".to_string();
        profile.password = "correct horse battery staple".to_string();
        profile
    }

    /// Pending item with one recipient and an HTML body, not yet persisted.
    pub fn test_queue_item(tenant: &TenantContext, profile_id: &Pulid) -> QueueItem {
        let mut item = QueueItem::new(
            tenant.organization_id.clone(),
            profile_id.clone(),
            vec!["consignee@example.com".to_string()],
            "Shipment update",
        );
        item.business_unit_id = tenant.business_unit_id.clone();
        item.html_body = "<p>Your shipment is on the way.</p>".to_string();
        item
    }

    /// `data:` URL payload for a small text file.
    pub fn text_attachment(file_name: &str) -> AttachmentPayload {
        AttachmentPayload {
            file_name: file_name.to_string(),
            content_type: "text/plain".to_string(),
            data: "data:text/plain;base64,aGVsbG8gd29ybGQ=".to_string(),
            content_id: None,
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over [`TmsResult`] values.

    use super::*;

    /// Assert the result is an error of the given taxonomy kind.
    pub fn assert_kind<T: std::fmt::Debug>(result: &TmsResult<T>, expected: ErrorKind) {
        match result {
            Err(err) => assert_eq!(err.kind(), expected, "unexpected kind for {}", err),
            Ok(value) => panic!("expected {:?} error, got Ok({:?})", expected, value),
        }
    }

    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TmsResult<T>) {
        assert_kind(result, ErrorKind::Validation);
    }

    pub fn assert_not_found<T: std::fmt::Debug>(result: &TmsResult<T>) {
        assert_kind(result, ErrorKind::NotFound);
    }

    pub fn assert_business_rule<T: std::fmt::Debug>(result: &TmsResult<T>) {
        assert_kind(result, ErrorKind::BusinessRule);
    }

    /// Assert a string is a Pulid with the given prefix.
    pub fn assert_pulid_prefix(id: &Pulid, prefix: &str) {
        assert_eq!(id.prefix(), Some(prefix), "unexpected prefix on {}", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_random_cycles() {
        let rng = FixedRandom::new("123");
        assert_eq!(rng.digits(7), "1231231");
        assert_eq!(rng.digits(0), "");
    }

    #[tokio::test]
    async fn test_mock_provider_failure_toggle() {
        let provider = MockEmailProvider::new(ProviderType::Smtp);
        let config = fixtures::test_profile(&fixtures::test_tenant());
        let message = Message {
            from: tms_core::email::Mailbox::new(&config.from_address, ""),
            to: vec!["a@example.com".to_string()],
            cc: vec![],
            bcc: vec![],
            subject: "s".to_string(),
            html: "h".to_string(),
            text: None,
            reply_to: None,
            headers: Default::default(),
            priority: Default::default(),
            attachments: vec![],
        };
        let cfg = ProviderConfig {
            provider_type: ProviderType::Smtp,
            host: config.host.clone(),
            port: 587,
            username: String::new(),
            password: String::new(),
            api_key: String::new(),
            oauth2_client_id: String::new(),
            oauth2_client_secret: String::new(),
            oauth2_tenant_id: String::new(),
            auth_type: config.auth_type,
            encryption_type: config.encryption_type,
            timeout: std::time::Duration::from_secs(30),
            max_connections: 1,
            metadata: Default::default(),
        };

        assert!(provider.send(&cfg, &message).await.is_ok());
        provider.set_failure(Some("boom"));
        let err = provider.send(&cfg, &message).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(provider.test_connection(&cfg).await.is_err());
        provider.set_failure(None);
        assert!(provider.test_connection(&cfg).await.is_ok());
        assert_eq!(provider.sent_count(), 1);
        assert_eq!(provider.connection_tests(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_generated_configs_are_valid(cfg in generators::arb_format_config()) {
            prop_assert!(cfg.validate().is_ok());
        }
    }
}
