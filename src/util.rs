use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{
    config::EngineConfig,
    data::{
        datasources::{
            backend_api_datasource::{BackendApiDatasource, BackendApiDatasourceImpl},
            fallback_file_datasource::read_fallback_snapshot,
            key_value_datasource::KeyValueDatasource,
            store_datasource::StoreDatasource,
        },
        network::rate_limiter::SlidingWindowRateLimiter,
        repositories::entitlements_repository_impl::EntitlementsRepositoryImpl,
    },
    domain::{
        entities::{
            entitlement::EntitlementMap,
            product::ProductId,
            purchase::Purchase,
            session_context::{Clock, SessionContext, SystemClock, UserId},
        },
        repositories::entitlements_repository::EntitlementsRepository,
    },
    errors::EntitlementError,
};

pub struct EntitlementsUtil<R: EntitlementsRepository> {
    entitlements_repository: R,
}

impl<R: EntitlementsRepository> EntitlementsUtil<R> {
    pub async fn launch(&self) -> Result<EntitlementMap, EntitlementError> {
        self.entitlements_repository.launch().await
    }

    pub async fn purchase(
        &self,
        product_id: &ProductId,
        offer_id: Option<&str>,
    ) -> Result<EntitlementMap, EntitlementError> {
        self.entitlements_repository
            .purchase(product_id, offer_id)
            .await
    }

    pub async fn restore(&self) -> Result<EntitlementMap, EntitlementError> {
        self.entitlements_repository.restore().await
    }

    pub async fn check_entitlements(&self) -> Result<EntitlementMap, EntitlementError> {
        self.entitlements_repository.check_entitlements().await
    }

    pub async fn on_purchases_updated(&self, purchases: Vec<Purchase>) {
        self.entitlements_repository
            .on_purchases_updated(purchases)
            .await
    }

    pub fn on_purchases_failed(&self, purchases: &[Purchase], error: EntitlementError) {
        self.entitlements_repository
            .on_purchases_failed(purchases, error)
    }

    pub async fn identify(&self, user_id: UserId) -> Result<EntitlementMap, EntitlementError> {
        self.entitlements_repository.identify(user_id).await
    }

    pub fn logout(&self) -> Result<(), EntitlementError> {
        self.entitlements_repository.logout()
    }

    pub async fn on_app_foreground(&self) {
        self.entitlements_repository.on_app_foreground().await
    }

    pub fn on_app_background(&self) {
        self.entitlements_repository.on_app_background()
    }

    pub fn subscribe_entitlement_updates(&self) -> broadcast::Receiver<EntitlementMap> {
        self.entitlements_repository
            .subscribe_entitlement_updates()
    }
}

impl<S: StoreDatasource> EntitlementsUtil<EntitlementsRepositoryImpl<BackendApiDatasourceImpl, S>> {
    /// Engine talking to the HTTP backend at `config.backend_url`.
    pub fn new(
        config: EngineConfig,
        store: S,
        storage: Arc<dyn KeyValueDatasource>,
    ) -> Result<Self, EntitlementError> {
        let context = Arc::new(Self::session_context(config, Arc::new(SystemClock))?);
        Self::from_context(
            BackendApiDatasourceImpl::new(context.clone()),
            store,
            storage,
            context,
        )
    }
}

impl<B: BackendApiDatasource, S: StoreDatasource> EntitlementsUtil<EntitlementsRepositoryImpl<B, S>> {
    /// Engine with a caller-supplied backend and clock.
    pub fn with_backend(
        config: EngineConfig,
        backend: B,
        store: S,
        storage: Arc<dyn KeyValueDatasource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EntitlementError> {
        let context = Arc::new(Self::session_context(config, clock)?);
        Self::from_context(backend, store, storage, context)
    }

    fn session_context(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<SessionContext, EntitlementError> {
        if config.project_key.is_empty() {
            return Err(EntitlementError::Configuration(
                "project key must not be empty".to_string(),
            ));
        }
        let install_date = clock.now();
        Ok(SessionContext::new(
            config,
            UserId::anonymous(),
            install_date,
            clock,
        ))
    }

    fn from_context(
        backend: B,
        store: S,
        storage: Arc<dyn KeyValueDatasource>,
        context: Arc<SessionContext>,
    ) -> Result<Self, EntitlementError> {
        let config = context.config();
        let fallback = config
            .fallback_file_path
            .as_deref()
            .map(read_fallback_snapshot)
            .transpose()?;
        let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window(),
        ));
        Ok(Self {
            entitlements_repository: EntitlementsRepositoryImpl::new(
                backend,
                store,
                storage,
                context,
                rate_limiter,
                fallback,
            )?,
        })
    }
}
