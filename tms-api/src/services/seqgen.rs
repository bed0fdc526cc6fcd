//! Sequence Generation Service
//!
//! Resolves the format for a tenant, allocates counters and renders them.

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tms_core::sequence::{self, FormatConfig, RandomSource, SequenceKind};
use tms_core::{ErrorContext, Pulid, ResultExt, TmsResult};
use tms_storage::{FormatOverrideStore, SequenceRequest, SequenceStore};
use tokio::time::Instant;

const OP_GET_FORMAT: &str = "get format configuration";
const OP_NEXT_SEQUENCE: &str = "get next sequence";
const OP_GENERATE: &str = "generate sequence number";

struct ZeroDigits;

impl RandomSource for ZeroDigits {
    fn digits(&self, count: usize) -> String {
        "0".repeat(count)
    }
}

// ============================================================================
// FORMAT PROVIDER
// ============================================================================

type FormatKey = (SequenceKind, Pulid, Pulid);

#[derive(Debug, Clone)]
struct CachedFormat {
    config: FormatConfig,
    cached_at: Instant,
}

/// Resolves the format for `(kind, organization, business unit)`.
///
/// Kinds that support overrides try the business unit, then the
/// organization, then the built-in default. Lookup failures fall back to the
/// default. Resolved overrides are cached for a configurable TTL.
pub struct FormatProvider {
    overrides: Arc<dyn FormatOverrideStore>,
    cache: DashMap<FormatKey, CachedFormat>,
    ttl_ms: AtomicU64,
}

impl FormatProvider {
    pub fn new(overrides: Arc<dyn FormatOverrideStore>, ttl: Duration) -> Self {
        Self {
            overrides,
            cache: DashMap::new(),
            ttl_ms: AtomicU64::new(ttl.as_millis() as u64),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn set_cache_ttl(&self, ttl: Duration) {
        self.ttl_ms.store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    pub async fn get_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> FormatConfig {
        if !kind.supports_overrides() {
            return FormatConfig::default_for(kind);
        }

        let key = (kind, organization_id.clone(), business_unit_id.clone());
        if let Some(hit) = self.cache.get(&key) {
            if hit.cached_at.elapsed() < self.ttl() {
                return hit.config.clone();
            }
        }

        match self.lookup(kind, organization_id, business_unit_id).await {
            Ok(config) => {
                self.cache.insert(
                    key,
                    CachedFormat {
                        config: config.clone(),
                        cached_at: Instant::now(),
                    },
                );
                config
            }
            Err(err) => {
                tracing::debug!(
                    kind = %kind,
                    organization_id = %organization_id,
                    error = %err,
                    "format override lookup failed, using default"
                );
                FormatConfig::default_for(kind)
            }
        }
    }

    async fn lookup(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<FormatConfig> {
        if let Some(config) = self
            .overrides
            .business_unit_format(kind, organization_id, business_unit_id)
            .await?
        {
            return Ok(config);
        }
        if let Some(config) = self
            .overrides
            .organization_format(kind, organization_id)
            .await?
        {
            return Ok(config);
        }
        Ok(FormatConfig::default_for(kind))
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub kind: SequenceKind,
    pub organization_id: Pulid,
    pub business_unit_id: Pulid,
    /// Batch size; ignored by single generation.
    pub count: i64,
    /// Render time; defaults to now.
    pub time: Option<DateTime<Utc>>,
    /// Explicit format, bypassing the provider.
    pub format: Option<FormatConfig>,
}

impl GenerateRequest {
    pub fn new(kind: SequenceKind, organization_id: Pulid, business_unit_id: Pulid) -> Self {
        Self {
            kind,
            organization_id,
            business_unit_id,
            count: 1,
            time: None,
            format: None,
        }
    }

    fn context(&self, operation: &str) -> ErrorContext {
        ErrorContext::new(operation)
            .tag("sequenceType", self.kind)
            .tag("organizationId", &self.organization_id)
            .tag("businessUnitId", &self.business_unit_id)
    }
}

#[derive(Clone)]
pub struct SequenceGenerator {
    store: SequenceStore,
    formats: Arc<FormatProvider>,
    rng: Arc<dyn RandomSource>,
}

impl SequenceGenerator {
    pub fn new(
        store: SequenceStore,
        formats: Arc<FormatProvider>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self { store, formats, rng }
    }

    pub fn formats(&self) -> &FormatProvider {
        &self.formats
    }

    async fn resolve_format(&self, req: &GenerateRequest) -> TmsResult<FormatConfig> {
        let config = match &req.format {
            Some(config) => config.clone(),
            None => {
                self.formats
                    .get_format(req.kind, &req.organization_id, &req.business_unit_id)
                    .await
            }
        };
        config
            .validate()
            .with_context(|| req.context(OP_GET_FORMAT))?;
        Ok(config)
    }

    fn store_request(req: &GenerateRequest, at: DateTime<Utc>, count: i64) -> SequenceRequest {
        SequenceRequest {
            kind: req.kind,
            organization_id: req.organization_id.clone(),
            business_unit_id: req.business_unit_id.clone(),
            year: at.year() as i16,
            month: at.month() as i16,
            count,
        }
    }

    fn render_one(
        &self,
        req: &GenerateRequest,
        config: &FormatConfig,
        counter: i64,
        at: DateTime<Utc>,
    ) -> TmsResult<String> {
        let rendered = sequence::render(config, counter, at, self.rng.as_ref())
            .with_context(|| req.context(OP_GENERATE).tag("counter", counter))?;
        sequence::verify_rendered(&rendered, config)
            .with_context(|| req.context(OP_GENERATE).tag("value", &rendered))?;
        Ok(rendered)
    }

    /// Render and verify a throwaway value so a format that can never pass
    /// verification fails before a counter is consumed.
    fn preflight(req: &GenerateRequest, config: &FormatConfig, at: DateTime<Utc>) -> TmsResult<()> {
        let rendered = sequence::render(config, 1, at, &ZeroDigits)
            .with_context(|| req.context(OP_GET_FORMAT))?;
        sequence::verify_rendered(&rendered, config)
            .with_context(|| req.context(OP_GET_FORMAT).tag("value", &rendered))?;
        Ok(())
    }

    /// Allocate one counter and render it.
    pub async fn generate(&self, req: &GenerateRequest) -> TmsResult<String> {
        let config = self.resolve_format(req).await?;
        let at = req.time.unwrap_or_else(Utc::now);
        Self::preflight(req, &config, at)?;

        let counter = self
            .store
            .next(&Self::store_request(req, at, 1))
            .await
            .with_context(|| req.context(OP_NEXT_SEQUENCE))?;

        let value = self.render_one(req, &config, counter, at)?;
        tracing::debug!(kind = %req.kind, organization_id = %req.organization_id, value = %value, "sequence generated");
        Ok(value)
    }

    /// Allocate `req.count` consecutive counters and render each.
    pub async fn generate_batch(&self, req: &GenerateRequest) -> TmsResult<Vec<String>> {
        if req.count <= 0 {
            return Ok(Vec::new());
        }
        let config = self.resolve_format(req).await?;
        let at = req.time.unwrap_or_else(Utc::now);
        Self::preflight(req, &config, at)?;

        let counters = self
            .store
            .next_batch(&Self::store_request(req, at, req.count))
            .await
            .with_context(|| req.context(OP_NEXT_SEQUENCE).tag("count", req.count))?;

        counters
            .into_iter()
            .map(|counter| self.render_one(req, &config, counter, at))
            .collect()
    }

    pub async fn generate_pro_number(
        &self,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<String> {
        self.generate(&GenerateRequest::new(
            SequenceKind::ProNumber,
            organization_id.clone(),
            business_unit_id.clone(),
        ))
        .await
    }

    pub async fn generate_pro_number_batch(
        &self,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
        count: i64,
    ) -> TmsResult<Vec<String>> {
        let mut req = GenerateRequest::new(
            SequenceKind::ProNumber,
            organization_id.clone(),
            business_unit_id.clone(),
        );
        req.count = count;
        self.generate_batch(&req).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
