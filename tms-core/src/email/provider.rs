//! Email provider trait.
//!
//! Concrete transports live with the HTTP service; this crate only fixes the
//! contract the sender dispatches through.

use super::message::Message;
use super::profile::{AuthType, EncryptionType, ProviderType};
use super::Metadata;
use crate::error::EmailError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Connection settings with secrets already decrypted.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub api_key: String,
    pub oauth2_client_id: String,
    pub oauth2_client_secret: String,
    pub oauth2_tenant_id: String,
    pub auth_type: AuthType,
    pub encryption_type: EncryptionType,
    pub timeout: Duration,
    pub max_connections: u32,
    pub metadata: Metadata,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_type", &self.provider_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth_type", &self.auth_type)
            .field("encryption_type", &self.encryption_type)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A transport capable of delivering [`Message`]s.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Deliver a message, returning the provider's message id.
    async fn send(&self, config: &ProviderConfig, message: &Message) -> Result<String, EmailError>;

    /// Check that the configuration can reach the provider.
    async fn test_connection(&self, config: &ProviderConfig) -> Result<(), EmailError>;
}
