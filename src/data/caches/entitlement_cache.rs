use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    data::datasources::{
        key_value_datasource::KeyValueDatasource,
        utils::{load_json, store_json},
    },
    domain::entities::{
        entitlement::EntitlementMap,
        launch_result::{FallbackSnapshot, LaunchResult, ProductPermissionMap},
        product::{Product, ProductId, StoreId},
        session_context::{AppState, SessionContext},
    },
    errors::EntitlementError,
};

const LAUNCH_RESULT_KEY: &str = "launch_result";
const ENTITLEMENTS_KEY: &str = "last_loaded_entitlements";
const SAVED_AT_KEY: &str = "launch_result_saved_at";

/// Last known server truth: products, entitlements and the product to
/// entitlement permission map.
///
/// The cache age is measured from the last `save`, i.e. the last server
/// response. Entitlements merged in by the fallback path never extend it.
pub(crate) struct EntitlementCache {
    storage: Arc<dyn KeyValueDatasource>,
    context: Arc<SessionContext>,
    launch_result: Option<LaunchResult>,
    entitlements: Option<EntitlementMap>,
    saved_at: Option<DateTime<Utc>>,
    fallback: Option<FallbackSnapshot>,
}

impl EntitlementCache {
    pub(crate) fn new(
        storage: Arc<dyn KeyValueDatasource>,
        context: Arc<SessionContext>,
        fallback: Option<FallbackSnapshot>,
    ) -> Result<Self, EntitlementError> {
        let launch_result = load_json(storage.as_ref(), LAUNCH_RESULT_KEY)?;
        let entitlements = load_json(storage.as_ref(), ENTITLEMENTS_KEY)?;
        let saved_at = load_json(storage.as_ref(), SAVED_AT_KEY)?;
        Ok(Self {
            storage,
            context,
            launch_result,
            entitlements,
            saved_at,
            fallback,
        })
    }

    /// Replaces everything with a fresh server snapshot and restarts the
    /// lifetime clock.
    pub(crate) fn save(&mut self, result: LaunchResult) -> Result<(), EntitlementError> {
        let now = self.context.now();
        store_json(self.storage.as_ref(), LAUNCH_RESULT_KEY, &result)?;
        store_json(self.storage.as_ref(), ENTITLEMENTS_KEY, &result.entitlements)?;
        store_json(self.storage.as_ref(), SAVED_AT_KEY, &now)?;

        debug!(
            "Cached launch result with {} products and {} entitlements.",
            result.products.len(),
            result.entitlements.len()
        );
        self.entitlements = Some(result.entitlements.clone());
        self.launch_result = Some(result);
        self.saved_at = Some(now);
        Ok(())
    }

    /// Cached entitlements, unless the cache is older than the lifetime for
    /// the current app state.
    pub(crate) fn get_actual_entitlements(&self) -> Option<EntitlementMap> {
        let saved_at = self.saved_at?;
        let lifetime = match self.context.app_state() {
            AppState::Foreground => self.context.config().foreground_cache_lifetime,
            AppState::Background => self.context.config().background_cache_lifetime,
        };
        if self.context.now() - saved_at >= lifetime.as_duration() {
            return None;
        }
        self.entitlements.clone()
    }

    /// Overwrites the entitlements only. Products, the permission map and the
    /// cache age are left as they are.
    pub(crate) fn update_entitlements(
        &mut self,
        merged: EntitlementMap,
    ) -> Result<(), EntitlementError> {
        store_json(self.storage.as_ref(), ENTITLEMENTS_KEY, &merged)?;
        self.entitlements = Some(merged);
        Ok(())
    }

    /// Drops the cached entitlements. Products and permissions are project
    /// wide and survive.
    pub(crate) fn clear(&mut self) -> Result<(), EntitlementError> {
        debug!("Clearing cached entitlements.");
        self.entitlements = None;
        self.storage.remove(ENTITLEMENTS_KEY)
    }

    pub(crate) fn launch_result(&self) -> Option<&LaunchResult> {
        self.launch_result.as_ref()
    }

    /// Products of the last launch result, or of the bundled snapshot when no
    /// launch result was ever cached.
    pub(crate) fn products(&self) -> Option<&HashMap<ProductId, Product>> {
        match (&self.launch_result, &self.fallback) {
            (Some(result), _) => Some(&result.products),
            (None, Some(fallback)) => Some(&fallback.products),
            (None, None) => None,
        }
    }

    pub(crate) fn product_permissions(&self) -> Option<&ProductPermissionMap> {
        self.launch_result
            .as_ref()
            .and_then(|result| result.product_permissions.as_ref())
            .or_else(|| self.fallback.as_ref().map(|f| &f.product_permissions))
    }

    pub(crate) fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products()?.get(id)
    }

    pub(crate) fn product_by_store_id(&self, store_id: &StoreId) -> Option<&Product> {
        self.products()?
            .values()
            .find(|p| p.store_id.as_ref() == Some(store_id))
    }
}
