use async_trait::async_trait;

use crate::{
    domain::entities::{
        product::{Product, ProductType},
        purchase::Purchase,
    },
    errors::EntitlementError,
};

/// The device's store billing client. Implemented by the host application;
/// failures are reported as `EntitlementError::StoreError`.
#[async_trait]
pub trait StoreDatasource: Send + Sync {
    /// Runs the store purchase flow and returns the confirmed transaction.
    ///
    /// offer_id:
    ///   Store-specific offer to apply, if any.
    async fn purchase(
        &self,
        product: &Product,
        offer_id: Option<&str>,
    ) -> Result<Purchase, EntitlementError>;

    /// Purchases the store currently considers owned (active subscriptions and
    /// unconsumed in-app products).
    async fn query_active_purchases(&self) -> Result<Vec<Purchase>, EntitlementError>;

    /// Most recent purchase per product, including expired and consumed ones.
    async fn query_purchase_history(
        &self,
        product_type: ProductType,
    ) -> Result<Vec<Purchase>, EntitlementError>;
}
