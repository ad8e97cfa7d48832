#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_repr::Deserialize_repr;
use serde_with::{serde_as, TimestampSeconds};

/// Body of a successful init, purchase or restore call.
#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct LaunchResultModel {
    /// Backend user id the snapshot belongs to.
    pub(crate) uid: String,
    /// Server time at which the snapshot was produced.
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub(crate) timestamp: DateTime<Utc>,
    /// All products configured for the project, keyed by product id.
    #[serde(default)]
    pub(crate) products: HashMap<String, ProductModel>,
    /// Entitlements of the user, keyed by entitlement id.
    #[serde(default)]
    pub(crate) permissions: HashMap<String, PermissionModel>,
    /// Products the user has purchased.
    #[serde(default)]
    pub(crate) user_products: HashMap<String, ProductModel>,
    /// Entitlement ids granted by each product. Older backends omit it.
    pub(crate) products_permissions: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProductModel {
    pub(crate) id: String,
    pub(crate) store_id: Option<String>,
    #[serde(rename = "type")]
    pub(crate) product_type: ProductTypeModel,
    pub(crate) duration: Option<ProductDurationModel>,
}

#[derive(Debug, Deserialize_repr, PartialEq)]
#[repr(u8)]
pub(crate) enum ProductTypeModel {
    Trial = 0,
    DirectSubscription = 1,
    OneTime = 2,
}

#[derive(Debug, Deserialize_repr, PartialEq)]
#[repr(u8)]
pub(crate) enum ProductDurationModel {
    Weekly = 0,
    Monthly = 1,
    ThreeMonths = 2,
    SixMonths = 3,
    Annual = 4,
    Lifetime = 5,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct PermissionModel {
    pub(crate) id: String,
    pub(crate) associated_product: String,
    pub(crate) renew_state: RenewStateModel,
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub(crate) started_timestamp: DateTime<Utc>,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    #[serde(default)]
    pub(crate) expiration_timestamp: Option<DateTime<Utc>>,
    /// 1 if active, 0 otherwise.
    pub(crate) active: u8,
    pub(crate) grant_type: Option<GrantTypeModel>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RenewStateModel {
    NonRenewable,
    WillRenew,
    Canceled,
    BillingIssue,

    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum GrantTypeModel {
    Purchase,
    FamilySharing,
    OfferCode,
    Manual,

    #[serde(untagged)]
    Unknown(String),
}
