use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::product::ProductId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementId(pub String);

impl From<&str> for EntitlementId {
    fn from(value: &str) -> Self {
        EntitlementId(value.to_string())
    }
}

impl fmt::Display for EntitlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type EntitlementMap = HashMap<EntitlementId, Entitlement>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenewState {
    Unknown,
    WillRenew,
    Canceled,
    BillingIssue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntitlementSource {
    /// Confirmed by the backend.
    Server,
    /// Computed on-device while the backend was unreachable.
    LocalFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantType {
    Purchase,
    FamilySharing,
    OfferCode,
    Manual,
}

/// A named right to access something (e.g. "premium") with a validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: EntitlementId,
    pub associated_product_id: ProductId,
    pub active: bool,
    pub renew_state: RenewState,
    pub started_at: DateTime<Utc>,
    /// `None` means the entitlement never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub source: EntitlementSource,
    pub grant_type: GrantType,
}

impl Entitlement {
    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Whether the entitlement is active and not yet expired at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}
