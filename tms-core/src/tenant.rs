//! Tenant identifiers carried by every core call.

use crate::pulid::Pulid;
use serde::{Deserialize, Serialize};

/// Two-level tenancy plus the acting user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub organization_id: Pulid,
    #[serde(default)]
    pub business_unit_id: Pulid,
    #[serde(default)]
    pub user_id: Pulid,
}

impl TenantContext {
    pub fn new(organization_id: Pulid, business_unit_id: Pulid, user_id: Pulid) -> Self {
        Self {
            organization_id,
            business_unit_id,
            user_id,
        }
    }

    /// Organization-wide scope with no business unit.
    pub fn organization(organization_id: Pulid) -> Self {
        Self::new(organization_id, Pulid::nil(), Pulid::nil())
    }
}
