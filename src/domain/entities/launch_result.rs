use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    entitlement::{EntitlementId, EntitlementMap},
    product::{Product, ProductId},
    session_context::UserId,
};

/// Which entitlement ids owning a product grants.
pub type ProductPermissionMap = HashMap<ProductId, BTreeSet<EntitlementId>>;

/// Authoritative snapshot returned by every successful init, purchase and
/// restore call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchResult {
    pub uid: UserId,
    pub timestamp: DateTime<Utc>,
    pub products: HashMap<ProductId, Product>,
    pub entitlements: EntitlementMap,
    pub user_products: HashMap<ProductId, Product>,
    pub product_permissions: Option<ProductPermissionMap>,
}

/// Products and permissions shipped with the application, used until the
/// first launch result has been cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackSnapshot {
    #[serde(default)]
    pub products: HashMap<ProductId, Product>,
    #[serde(default)]
    pub product_permissions: ProductPermissionMap,
}
