//! Per-tenant sequence format overrides.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tms_core::sequence::{FormatConfig, SequenceKind};
use tms_core::{Pulid, StorageError, TmsResult};

/// Lookup of configured format overrides. `Ok(None)` means nothing is
/// configured at that scope.
#[async_trait]
pub trait FormatOverrideStore: Send + Sync {
    async fn business_unit_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<Option<FormatConfig>>;

    async fn organization_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
    ) -> TmsResult<Option<FormatConfig>>;
}

type ScopeKey = (SequenceKind, Pulid, Pulid);

/// Overrides held in memory. Organization-level entries use a nil business
/// unit.
#[derive(Debug, Default)]
pub struct InMemoryFormatOverrides {
    formats: DashMap<ScopeKey, FormatConfig>,
    failing: AtomicBool,
}

impl InMemoryFormatOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_organization_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        format: FormatConfig,
    ) {
        self.formats
            .insert((kind, organization_id.clone(), Pulid::nil()), format);
    }

    pub fn set_business_unit_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
        format: FormatConfig,
    ) {
        self.formats.insert(
            (kind, organization_id.clone(), business_unit_id.clone()),
            format,
        );
    }

    /// Make every lookup fail, as an unreachable database would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn lookup(&self, key: ScopeKey) -> TmsResult<Option<FormatConfig>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed {
                reason: "format override lookup unavailable".to_string(),
            }
            .into());
        }
        Ok(self.formats.get(&key).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl FormatOverrideStore for InMemoryFormatOverrides {
    async fn business_unit_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
        business_unit_id: &Pulid,
    ) -> TmsResult<Option<FormatConfig>> {
        if business_unit_id.is_nil() {
            return Ok(None);
        }
        self.lookup((kind, organization_id.clone(), business_unit_id.clone()))
    }

    async fn organization_format(
        &self,
        kind: SequenceKind,
        organization_id: &Pulid,
    ) -> TmsResult<Option<FormatConfig>> {
        self.lookup((kind, organization_id.clone(), Pulid::nil()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scopes_are_separate() {
        let store = InMemoryFormatOverrides::new();
        let org = Pulid::new("org");
        let bu = Pulid::new("bu");
        let mut custom = FormatConfig::default_for(SequenceKind::ProNumber);
        custom.prefix = "P".to_string();
        store.set_business_unit_format(SequenceKind::ProNumber, &org, &bu, custom.clone());

        let found = store
            .business_unit_format(SequenceKind::ProNumber, &org, &bu)
            .await
            .unwrap();
        assert_eq!(found, Some(custom));
        assert_eq!(
            store
                .organization_format(SequenceKind::ProNumber, &org)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            store
                .business_unit_format(SequenceKind::ProNumber, &org, &Pulid::nil())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_failing_lookup() {
        let store = InMemoryFormatOverrides::new();
        store.set_failing(true);
        assert!(store
            .organization_format(SequenceKind::Consolidation, &Pulid::new("org"))
            .await
            .is_err());
    }
}
