//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use tms_core::sequence::OsRandom;
use tms_core::ConfigError;
use tms_storage::{
    InMemoryAttachmentHandler, InMemoryCache, InMemoryFormatOverrides, InMemorySequenceAllocator,
    InMemorySessionStore, RateLimitCache, SequenceStore, SessionService,
};

use crate::config::ApiConfig;
use crate::db::DbClient;
use crate::pg::{PgEmailStore, PgFormatOverrides, PgSequenceAllocator, PgSessionStore};
use crate::providers::ProviderRegistry;
use crate::services::email::EmailStores;
use crate::services::{EmailService, FormatProvider, SequenceGenerator};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub sequences: Arc<SequenceGenerator>,
    pub email: Arc<EmailService>,
    /// Session lookups for the auth middleware.
    pub sessions: Arc<dyn SessionService>,
    /// Counter store for the rate limiter.
    pub rate_limits: Arc<dyn RateLimitCache>,
    /// `None` when running on the in-memory stores.
    pub db: Option<DbClient>,
    pub start_time: Instant,
}

impl AppState {
    /// Everything in process memory. Used by tests and local development.
    pub fn in_memory(config: &ApiConfig, registry: ProviderRegistry) -> Result<Self, ConfigError> {
        let store = SequenceStore::new(
            Arc::new(InMemorySequenceAllocator::new()),
            config.sequence.retry_policy(),
        );
        let formats = FormatProvider::new(
            Arc::new(InMemoryFormatOverrides::new()),
            config.sequence.format_cache_ttl,
        );
        let email = EmailService::new(
            EmailStores::in_memory(),
            Arc::new(InMemoryAttachmentHandler::new()),
            Arc::new(registry),
            Arc::new(config.encryptor()?),
            &config.email_queue,
        );

        Ok(Self {
            sequences: Arc::new(SequenceGenerator::new(store, Arc::new(formats), Arc::new(OsRandom))),
            email: Arc::new(email),
            sessions: Arc::new(InMemorySessionStore::new(config.session.policy())),
            rate_limits: Arc::new(InMemoryCache::new()),
            db: None,
            start_time: Instant::now(),
        })
    }

    /// PostgreSQL-backed stores. Attachment blobs and rate-limit counters
    /// stay in process memory.
    pub fn with_database(
        db: DbClient,
        config: &ApiConfig,
        registry: ProviderRegistry,
    ) -> Result<Self, ConfigError> {
        let store = SequenceStore::new(
            Arc::new(PgSequenceAllocator::new(db.clone())),
            config.sequence.retry_policy(),
        );
        let formats = FormatProvider::new(
            Arc::new(PgFormatOverrides::new(db.clone())),
            config.sequence.format_cache_ttl,
        );
        let email = EmailService::new(
            EmailStores::shared(Arc::new(PgEmailStore::new(db.clone()))),
            Arc::new(InMemoryAttachmentHandler::new()),
            Arc::new(registry),
            Arc::new(config.encryptor()?),
            &config.email_queue,
        );

        Ok(Self {
            sequences: Arc::new(SequenceGenerator::new(store, Arc::new(formats), Arc::new(OsRandom))),
            email: Arc::new(email),
            sessions: Arc::new(PgSessionStore::new(db.clone(), config.session.policy())),
            rate_limits: Arc::new(InMemoryCache::new()),
            db: Some(db),
            start_time: Instant::now(),
        })
    }
}

crate::impl_from_ref!(Arc<SequenceGenerator>, sequences);
crate::impl_from_ref!(Arc<EmailService>, email);
crate::impl_from_ref!(Option<DbClient>, db);
crate::impl_from_ref!(Instant, start_time);
