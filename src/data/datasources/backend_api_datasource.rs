use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    data::models::backend_api::{
        common::ResponseWrapperModel,
        launch_result_model::{
            GrantTypeModel, LaunchResultModel, PermissionModel, ProductDurationModel,
            ProductModel, ProductTypeModel, RenewStateModel,
        },
        request_models::{
            InitRequestModel, PurchaseModel, PurchaseRequestModel, RestoreRequestModel,
        },
    },
    domain::entities::{
        entitlement::{
            Entitlement, EntitlementId, EntitlementSource, GrantType, RenewState,
        },
        launch_result::LaunchResult,
        product::{Product, ProductId, ProductType, StoreId},
        purchase::Purchase,
        session_context::{SessionContext, UserId},
    },
    errors::EntitlementError,
};

/// The backend API. Every call answers with a full `LaunchResult` snapshot.
#[async_trait]
pub trait BackendApiDatasource: Send + Sync {
    /// Registers the session, reporting the purchases the store currently
    /// holds.
    async fn init(
        &self,
        install_date: DateTime<Utc>,
        purchases: &[Purchase],
    ) -> Result<LaunchResult, EntitlementError>;

    /// Reports a single completed store purchase.
    ///
    /// product_id:
    ///   Backend product the store product belongs to, when known.
    async fn purchase(
        &self,
        install_date: DateTime<Utc>,
        purchase: &Purchase,
        product_id: Option<&ProductId>,
    ) -> Result<LaunchResult, EntitlementError>;

    /// Reports the full purchase history so the backend can rebuild the
    /// user's entitlements.
    async fn restore(
        &self,
        install_date: DateTime<Utc>,
        history: &[Purchase],
    ) -> Result<LaunchResult, EntitlementError>;
}

pub struct BackendApiDatasourceImpl {
    client: reqwest::Client,
    context: Arc<SessionContext>,
}

#[async_trait]
impl BackendApiDatasource for BackendApiDatasourceImpl {
    async fn init(
        &self,
        install_date: DateTime<Utc>,
        purchases: &[Purchase],
    ) -> Result<LaunchResult, EntitlementError> {
        let uid = self.context.uid();
        let body = InitRequestModel {
            uid: &uid.0,
            install_date,
            purchases: purchases.iter().map(PurchaseModel::from_purchase).collect(),
        };
        self.callout("v1/user/init", &body).await
    }

    async fn purchase(
        &self,
        install_date: DateTime<Utc>,
        purchase: &Purchase,
        product_id: Option<&ProductId>,
    ) -> Result<LaunchResult, EntitlementError> {
        let uid = self.context.uid();
        let body = PurchaseRequestModel {
            uid: &uid.0,
            install_date,
            purchase: PurchaseModel::from_purchase(purchase),
            product_id: product_id.map(|id| id.0.as_str()),
        };
        self.callout("v1/user/purchase", &body).await
    }

    async fn restore(
        &self,
        install_date: DateTime<Utc>,
        history: &[Purchase],
    ) -> Result<LaunchResult, EntitlementError> {
        let uid = self.context.uid();
        let body = RestoreRequestModel {
            uid: &uid.0,
            install_date,
            history: history.iter().map(PurchaseModel::from_purchase).collect(),
        };
        self.callout("v1/user/restore", &body).await
    }
}

impl BackendApiDatasourceImpl {
    pub(crate) fn new(context: Arc<SessionContext>) -> Self {
        Self {
            client: reqwest::Client::new(),
            context,
        }
    }

    async fn callout<B: Serialize, T>(&self, path: &str, body: &B) -> Result<T, EntitlementError>
    where
        T: TryFromModel,
    {
        let config = self.context.config();
        let url = format!("{}/{}", config.backend_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", config.project_key))
            .json(body)
            .send()
            .await
            .map_err(|e| EntitlementError::NetworkUnreachable(format!("{path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EntitlementError::from_status(
                status.as_u16(),
                response.text().await.unwrap_or_default(),
            ));
        }

        let wrapper: ResponseWrapperModel<T::Model> = response.json().await.map_err(|e| {
            EntitlementError::parsing_with_debug(&format!("{path}: invalid response body"), &e)
        })?;
        unwrap_response(path, status.as_u16(), wrapper).and_then(T::try_from_model)
    }
}

fn unwrap_response<M>(
    path: &str,
    status: u16,
    wrapper: ResponseWrapperModel<M>,
) -> Result<M, EntitlementError> {
    if !wrapper.success {
        let message = wrapper
            .error
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("{path}: request was not successful"));
        return Err(EntitlementError::BackendClientError { status, message });
    }
    wrapper.data.ok_or_else(|| {
        EntitlementError::ResponseParsingFailed(format!("{path}: response is missing data"))
    })
}

// Model conversions:
// ----------------------------

pub(crate) trait TryFromModel: Sized {
    type Model: DeserializeOwned;

    fn try_from_model(model: Self::Model) -> Result<Self, EntitlementError>;
}

impl TryFromModel for LaunchResult {
    type Model = LaunchResultModel;

    fn try_from_model(m: LaunchResultModel) -> Result<Self, EntitlementError> {
        Ok(LaunchResult {
            uid: UserId(m.uid),
            timestamp: m.timestamp,
            products: convert_products(m.products),
            entitlements: m
                .permissions
                .into_values()
                .map(|p| {
                    let entitlement = Entitlement::from_permission_model(p);
                    (entitlement.id.clone(), entitlement)
                })
                .collect(),
            user_products: convert_products(m.user_products),
            product_permissions: m.products_permissions.map(|permissions| {
                permissions
                    .into_iter()
                    .map(|(product_id, ids)| {
                        (
                            ProductId(product_id),
                            ids.into_iter().map(EntitlementId).collect::<BTreeSet<_>>(),
                        )
                    })
                    .collect()
            }),
        })
    }
}

fn convert_products(models: HashMap<String, ProductModel>) -> HashMap<ProductId, Product> {
    models
        .into_values()
        .map(|m| {
            let product = Product::from_product_model(m);
            (product.id.clone(), product)
        })
        .collect()
}

impl Product {
    fn from_product_model(m: ProductModel) -> Self {
        Product {
            id: ProductId(m.id),
            store_id: m.store_id.filter(|id| !id.is_empty()).map(StoreId),
            product_type: match m.product_type {
                ProductTypeModel::Trial | ProductTypeModel::DirectSubscription => {
                    ProductType::Subscription
                }
                ProductTypeModel::OneTime => ProductType::InApp,
            },
            duration_days: m.duration.and_then(|d| match d {
                ProductDurationModel::Weekly => Some(7),
                ProductDurationModel::Monthly => Some(30),
                ProductDurationModel::ThreeMonths => Some(90),
                ProductDurationModel::SixMonths => Some(180),
                ProductDurationModel::Annual => Some(365),
                ProductDurationModel::Lifetime => None,
            }),
        }
    }
}

impl Entitlement {
    fn from_permission_model(m: PermissionModel) -> Self {
        Entitlement {
            id: EntitlementId(m.id),
            associated_product_id: ProductId(m.associated_product),
            active: m.active == 1,
            renew_state: match m.renew_state {
                RenewStateModel::WillRenew => RenewState::WillRenew,
                RenewStateModel::Canceled => RenewState::Canceled,
                RenewStateModel::BillingIssue => RenewState::BillingIssue,
                RenewStateModel::NonRenewable | RenewStateModel::Unknown(_) => RenewState::Unknown,
            },
            started_at: m.started_timestamp,
            expires_at: m.expiration_timestamp,
            source: EntitlementSource::Server,
            grant_type: match m.grant_type {
                Some(GrantTypeModel::FamilySharing) => GrantType::FamilySharing,
                Some(GrantTypeModel::OfferCode) => GrantType::OfferCode,
                Some(GrantTypeModel::Manual) => GrantType::Manual,
                Some(GrantTypeModel::Purchase) | Some(GrantTypeModel::Unknown(_)) | None => {
                    GrantType::Purchase
                }
            },
        }
    }
}

impl<'a> PurchaseModel<'a> {
    fn from_purchase(purchase: &'a Purchase) -> Self {
        PurchaseModel {
            product: &purchase.store_product_id.0,
            order_id: purchase.order_id.as_deref(),
            original_order_id: purchase.original_order_id.as_deref(),
            purchase_time: purchase.purchase_time,
            purchase_token: &purchase.purchase_token,
            acknowledged: purchase.acknowledged,
        }
    }
}
