use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    domain::entities::{
        entitlement::EntitlementMap, product::ProductId, purchase::Purchase,
        session_context::UserId,
    },
    errors::EntitlementError,
};

#[async_trait]
pub trait EntitlementsRepository: Send + Sync {
    /// Reports the purchases the store currently holds and caches the
    /// resulting snapshot.
    async fn launch(&self) -> Result<EntitlementMap, EntitlementError>;

    /// Buys `product_id` through the store and returns the entitlements it
    /// unlocked, computed locally if the backend is unreachable.
    async fn purchase(
        &self,
        product_id: &ProductId,
        offer_id: Option<&str>,
    ) -> Result<EntitlementMap, EntitlementError>;

    /// Sends the full store purchase history to the backend. Concurrent calls
    /// share one outcome.
    async fn restore(&self) -> Result<EntitlementMap, EntitlementError>;

    /// Cached entitlements, relaunching first if they are stale or missing.
    async fn check_entitlements(&self) -> Result<EntitlementMap, EntitlementError>;

    /// Store push callback for completed (or pending) transactions.
    async fn on_purchases_updated(&self, purchases: Vec<Purchase>);

    /// Store push callback for a failed billing flow. An empty `purchases`
    /// fails every purchase awaiting store confirmation.
    fn on_purchases_failed(&self, purchases: &[Purchase], error: EntitlementError);

    async fn identify(&self, user_id: UserId) -> Result<EntitlementMap, EntitlementError>;

    fn logout(&self) -> Result<(), EntitlementError>;

    async fn on_app_foreground(&self);

    fn on_app_background(&self);

    /// Entitlements resulting from store pushes that no caller was waiting
    /// for.
    fn subscribe_entitlement_updates(&self) -> broadcast::Receiver<EntitlementMap>;
}
