//! Email provider registry and transports.
//!
//! - [`SmtpProvider`]: SMTP, Exchange and Office365 over lettre
//! - [`SendGridProvider`]: SendGrid v3 mail send over reqwest
//!
//! Other provider types can be registered at startup with any
//! [`EmailProvider`] implementation.

mod sendgrid;
mod smtp;

pub use sendgrid::SendGridProvider;
pub use smtp::SmtpProvider;

use std::collections::HashMap;
use std::sync::Arc;
use tms_core::email::{EmailProvider, ProviderType};
use tms_core::EmailError;

/// Providers keyed by the profile's provider type.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderType, Arc<dyn EmailProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled SMTP-family and SendGrid transports.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in [
            ProviderType::Smtp,
            ProviderType::Exchange,
            ProviderType::Office365,
        ] {
            registry.register(Arc::new(SmtpProvider::new(kind)));
        }
        registry.register(Arc::new(SendGridProvider::new()));
        registry
    }

    /// Register a provider, replacing any previous one for the same type.
    pub fn register(&mut self, provider: Arc<dyn EmailProvider>) {
        self.providers.insert(provider.provider_type(), provider);
    }

    pub fn get(&self, provider_type: ProviderType) -> Result<Arc<dyn EmailProvider>, EmailError> {
        self.providers
            .get(&provider_type)
            .cloned()
            .ok_or_else(|| EmailError::ProviderNotRegistered {
                provider_type: provider_type.to_string(),
            })
    }

    pub fn registered(&self) -> Vec<ProviderType> {
        let mut types: Vec<ProviderType> = self.providers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

/// Provider failure carrying the transport's message verbatim.
pub(crate) fn provider_error(provider_type: ProviderType, reason: impl Into<String>) -> EmailError {
    EmailError::Provider {
        provider_type: provider_type.to_string(),
        reason: reason.into(),
    }
}
