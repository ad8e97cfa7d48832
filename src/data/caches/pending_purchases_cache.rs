use std::sync::Arc;

use crate::{
    data::datasources::{
        key_value_datasource::KeyValueDatasource,
        utils::{load_json, store_json},
    },
    domain::entities::purchase::Purchase,
    errors::EntitlementError,
};

const PENDING_PURCHASES_KEY: &str = "pending_purchases";

/// Purchases the backend never acknowledged because it was unreachable.
/// They are resubmitted after the next successful launch.
pub(crate) struct PendingPurchasesCache {
    storage: Arc<dyn KeyValueDatasource>,
    purchases: Vec<Purchase>,
}

impl PendingPurchasesCache {
    pub(crate) fn new(storage: Arc<dyn KeyValueDatasource>) -> Result<Self, EntitlementError> {
        let purchases = load_json(storage.as_ref(), PENDING_PURCHASES_KEY)?.unwrap_or_default();
        Ok(Self { storage, purchases })
    }

    pub(crate) fn save(&mut self, purchase: &Purchase) -> Result<(), EntitlementError> {
        if self
            .purchases
            .iter()
            .any(|p| p.dedup_key() == purchase.dedup_key())
        {
            return Ok(());
        }
        self.purchases.push(purchase.clone());
        self.persist()
    }

    pub(crate) fn remove(&mut self, purchase: &Purchase) -> Result<(), EntitlementError> {
        let count = self.purchases.len();
        self.purchases.retain(|p| p.dedup_key() != purchase.dedup_key());
        if self.purchases.len() == count {
            return Ok(());
        }
        self.persist()
    }

    pub(crate) fn all(&self) -> Vec<Purchase> {
        self.purchases.clone()
    }

    fn persist(&self) -> Result<(), EntitlementError> {
        store_json(self.storage.as_ref(), PENDING_PURCHASES_KEY, &self.purchases)
    }
}
