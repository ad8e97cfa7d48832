use chrono::{serde::ts_seconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::product::StoreId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurchaseState {
    Purchased,
    Pending,
    Unspecified,
}

/// A transaction as reported by the store client, either freshly completed or
/// read back from the purchase history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Purchase {
    pub store_product_id: StoreId,
    /// Absent for some historical records.
    pub order_id: Option<String>,
    /// For subscriptions, the order id of the first purchase in the renewal
    /// chain.
    pub original_order_id: Option<String>,
    #[serde(with = "ts_seconds")]
    pub purchase_time: DateTime<Utc>,
    pub purchase_token: String,
    pub acknowledged: bool,
    pub state: PurchaseState,
}

impl Purchase {
    /// Key under which the purchase is remembered once handled: the order id,
    /// or the store product id when there is none.
    pub fn dedup_key(&self) -> &str {
        match self.order_id.as_deref() {
            Some(order_id) if !order_id.is_empty() => order_id,
            _ => &self.store_product_id.0,
        }
    }
}
