use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::{
    data::caches::entitlement_cache::EntitlementCache,
    domain::entities::{
        entitlement::{
            Entitlement, EntitlementId, EntitlementMap, EntitlementSource, GrantType, RenewState,
        },
        launch_result::ProductPermissionMap,
        product::{Product, ProductId},
        purchase::Purchase,
        session_context::SessionContext,
    },
    errors::EntitlementError,
};

/// Computes entitlements on-device from the cached permission map when the
/// backend could not be reached.
pub(crate) struct LocalFallbackGranter {
    context: Arc<SessionContext>,
}

impl LocalFallbackGranter {
    pub(crate) fn new(context: Arc<SessionContext>) -> Self {
        Self { context }
    }

    /// Grants the entitlements of the purchased product. `product_id` is the
    /// product the caller asked for, if known; otherwise the product is
    /// looked up by its store id.
    ///
    /// Without cached products and permissions, or when the product is
    /// unknown, the cached entitlements are dropped and `error` is returned.
    pub(crate) fn grant_after_failed_purchase(
        &self,
        cache: &mut EntitlementCache,
        purchase: &Purchase,
        product_id: Option<&ProductId>,
        error: EntitlementError,
    ) -> Result<EntitlementMap, EntitlementError> {
        let Some(permissions) = cache.product_permissions().cloned() else {
            return Self::fail(cache, error);
        };
        let product = match product_id {
            Some(id) => cache.product(id),
            None => cache.product_by_store_id(&purchase.store_product_id),
        };
        let Some(product) = product.cloned() else {
            debug!(
                "No cached product for store product {}, cannot grant locally.",
                purchase.store_product_id
            );
            return Self::fail(cache, error);
        };

        let granted = self.create_entitlements(&product, purchase, &permissions);
        self.merge_into_cache(cache, granted)
    }

    /// Grants the entitlements of every history record whose product is
    /// known. Records for unknown products are skipped.
    pub(crate) fn grant_after_failed_restore(
        &self,
        cache: &mut EntitlementCache,
        history: &[Purchase],
        error: EntitlementError,
    ) -> Result<EntitlementMap, EntitlementError> {
        if cache.products().is_none() {
            return Self::fail(cache, error);
        }
        let Some(permissions) = cache.product_permissions().cloned() else {
            return Self::fail(cache, error);
        };

        let granted = history
            .iter()
            .filter_map(|record| {
                cache
                    .product_by_store_id(&record.store_product_id)
                    .map(|product| self.create_entitlements(product, record, &permissions))
            })
            .flatten()
            .collect::<Vec<_>>();
        self.merge_into_cache(cache, granted)
    }

    fn fail(
        cache: &mut EntitlementCache,
        error: EntitlementError,
    ) -> Result<EntitlementMap, EntitlementError> {
        warn!("Local entitlement grant impossible, dropping cached entitlements.");
        if let Err(clear_error) = cache.clear() {
            warn!("Failed to clear entitlement cache: {}", clear_error);
        }
        Err(error)
    }

    fn create_entitlements(
        &self,
        product: &Product,
        purchase: &Purchase,
        permissions: &ProductPermissionMap,
    ) -> Vec<Entitlement> {
        let now = self.context.now();
        permissions
            .get(&product.id)
            .into_iter()
            .flatten()
            .filter_map(|id| create_entitlement(id, product, purchase.purchase_time, now))
            .collect()
    }

    fn merge_into_cache(
        &self,
        cache: &mut EntitlementCache,
        granted: Vec<Entitlement>,
    ) -> Result<EntitlementMap, EntitlementError> {
        let existing = cache.get_actual_entitlements().unwrap_or_default();
        let count = granted.len();
        let merged = merge(existing, granted, self.context.now());
        cache.update_entitlements(merged.clone())?;
        info!(
            "Granted {} entitlement(s) locally, {} cached in total.",
            count,
            merged.len()
        );
        Ok(merged)
    }
}

/// An entitlement valid for the product's duration from `purchase_time`, or
/// `None` if that period has already ended.
fn create_entitlement(
    id: &EntitlementId,
    product: &Product,
    purchase_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<Entitlement> {
    let expires_at = product
        .duration_days
        .map(|days| purchase_time + Duration::days(i64::from(days)));
    if expires_at.is_some_and(|expires_at| expires_at <= now) {
        return None;
    }
    Some(Entitlement {
        id: id.clone(),
        associated_product_id: product.id.clone(),
        active: true,
        renew_state: RenewState::Unknown,
        started_at: purchase_time,
        expires_at,
        source: EntitlementSource::LocalFallback,
        grant_type: GrantType::Purchase,
    })
}

/// Merges `granted` into `existing` per entitlement id. A new entry replaces
/// the existing one when that is no longer active, or when the new one
/// expires strictly later (a permanent entry expires after everything).
pub(crate) fn merge(
    mut existing: EntitlementMap,
    granted: Vec<Entitlement>,
    now: DateTime<Utc>,
) -> EntitlementMap {
    for new in granted {
        let replace = match existing.get(&new.id) {
            None => true,
            Some(current) => {
                !current.is_active_at(now)
                    || expires_later(new.expires_at, current.expires_at)
            }
        };
        if replace {
            existing.insert(new.id.clone(), new);
        }
    }
    existing
}

fn expires_later(new: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (new, current) {
        (None, None) | (Some(_), None) => false,
        (None, Some(_)) => true,
        (Some(new), Some(current)) => new > current,
    }
}
