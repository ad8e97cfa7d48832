use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::{serde_as, TimestampSeconds};

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct InitRequestModel<'a> {
    pub(crate) uid: &'a str,
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub(crate) install_date: DateTime<Utc>,
    pub(crate) purchases: Vec<PurchaseModel<'a>>,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct PurchaseRequestModel<'a> {
    pub(crate) uid: &'a str,
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub(crate) install_date: DateTime<Utc>,
    pub(crate) purchase: PurchaseModel<'a>,
    /// Backend product id, when the purchased store product is known.
    pub(crate) product_id: Option<&'a str>,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct RestoreRequestModel<'a> {
    pub(crate) uid: &'a str,
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub(crate) install_date: DateTime<Utc>,
    pub(crate) history: Vec<PurchaseModel<'a>>,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct PurchaseModel<'a> {
    /// Store product id (SKU).
    pub(crate) product: &'a str,
    pub(crate) order_id: Option<&'a str>,
    pub(crate) original_order_id: Option<&'a str>,
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub(crate) purchase_time: DateTime<Utc>,
    pub(crate) purchase_token: &'a str,
    pub(crate) acknowledged: bool,
}
