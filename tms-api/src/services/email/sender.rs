//! Dispatches messages to the provider registered for a profile.

use crate::providers::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;
use tms_core::email::{EmailProfile, Message, ProviderConfig, SecretField};
use tms_core::{ConfigError, Encryptor, ErrorContext, ResultExt, TmsResult};

#[derive(Clone)]
pub struct EmailSender {
    registry: Arc<ProviderRegistry>,
    encryptor: Arc<Encryptor>,
}

impl EmailSender {
    pub fn new(registry: Arc<ProviderRegistry>, encryptor: Arc<Encryptor>) -> Self {
        Self {
            registry,
            encryptor,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Connection settings for `profile` with its secrets decrypted.
    pub fn provider_config(&self, profile: &EmailProfile) -> TmsResult<ProviderConfig> {
        let decrypt = |field: SecretField| -> TmsResult<String> {
            self.encryptor
                .decrypt(profile.secret(field))
                .with_context(|| {
                    ErrorContext::new("decrypt profile secret")
                        .tag("field", field.name())
                        .tag("profileId", &profile.id)
                })
        };

        let port = if profile.port == 0 {
            0
        } else {
            u16::try_from(profile.port).map_err(|_| ConfigError::InvalidValue {
                field: "port".to_string(),
                value: profile.port.to_string(),
                reason: "must be between 1 and 65535".to_string(),
            })?
        };

        Ok(ProviderConfig {
            provider_type: profile.provider_type,
            host: profile.host.clone(),
            port,
            username: profile.username.clone(),
            password: decrypt(SecretField::Password)?,
            api_key: decrypt(SecretField::ApiKey)?,
            oauth2_client_id: profile.oauth2_client_id.clone(),
            oauth2_client_secret: decrypt(SecretField::OAuth2ClientSecret)?,
            oauth2_tenant_id: profile.oauth2_tenant_id.clone(),
            auth_type: profile.auth_type,
            encryption_type: profile.encryption_type,
            timeout: Duration::from_secs(profile.timeout_seconds.max(1) as u64),
            max_connections: profile.max_connections.max(1) as u32,
            metadata: profile.metadata.clone(),
        })
    }

    /// Send through the profile's provider, returning the provider message id.
    pub async fn send(&self, profile: &EmailProfile, message: &Message, queue_id: &str) -> TmsResult<String> {
        let ctx = || {
            ErrorContext::new("send email")
                .tag("providerType", profile.provider_type)
                .tag("queueId", queue_id)
        };

        let provider = self.registry.get(profile.provider_type).with_context(ctx)?;
        let config = self.provider_config(profile).with_context(ctx)?;

        provider
            .send(&config, message)
            .await
            .with_context(ctx)
    }

    pub async fn test_connection(&self, profile: &EmailProfile) -> TmsResult<()> {
        let ctx = || {
            ErrorContext::new("test connection")
                .tag("providerType", profile.provider_type)
                .tag("profileId", &profile.id)
        };

        let provider = self.registry.get(profile.provider_type).with_context(ctx)?;
        let config = self.provider_config(profile).with_context(ctx)?;

        provider
            .test_connection(&config)
            .await
            .with_context(ctx)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tms_core::email::ProviderType;
    use tms_core::{EmailError, Pulid, TmsError};

    fn sender() -> EmailSender {
        EmailSender::new(
            Arc::new(ProviderRegistry::with_defaults()),
            Arc::new(Encryptor::from_passphrase("sender-test-key")),
        )
    }

    #[test]
    fn test_provider_config_decrypts_secrets() {
        let sender = sender();
        let mut profile = EmailProfile::smtp(Pulid::new("org"), "P", "smtp.example.com", "a@example.com");
        profile.password = sender.encryptor.encrypt("hunter2").unwrap();

        let config = sender.provider_config(&profile).unwrap();
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.api_key, "");
        assert_eq!(config.port, 587);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_bad_ciphertext_is_tagged() {
        let sender = sender();
        let mut profile = EmailProfile::smtp(Pulid::new("org"), "P", "smtp.example.com", "a@example.com");
        profile.password = "not-ciphertext!".to_string();

        let err = sender.provider_config(&profile).unwrap_err();
        assert_eq!(err.tag("field"), Some("password"));
    }

    #[tokio::test]
    async fn test_unregistered_provider_carries_tags() {
        let sender = sender();
        let mut profile = EmailProfile::smtp(Pulid::new("org"), "P", "", "a@example.com");
        profile.provider_type = ProviderType::Mailgun;
        let message = Message {
            from: tms_core::email::Mailbox::new("a@example.com", ""),
            to: vec!["b@example.com".to_string()],
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

        let err = sender.send(&profile, &message, "q_1").await.unwrap_err();
        assert_eq!(err.operations(), vec!["send email"]);
        assert_eq!(err.tag("providerType"), Some("Mailgun"));
        assert_eq!(err.tag("queueId"), Some("q_1"));
        assert!(matches!(
            err.root(),
            TmsError::Email(EmailError::ProviderNotRegistered { .. })
        ));
    }
}
