#![allow(dead_code)]

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use entitlement_engine::{
    config::EngineConfig,
    domain::entities::{
        entitlement::{
            Entitlement, EntitlementId, EntitlementMap, EntitlementSource, GrantType, RenewState,
        },
        launch_result::LaunchResult,
        product::{Product, ProductId, ProductType, StoreId},
        purchase::{Purchase, PurchaseState},
        session_context::{ManualClock, UserId},
    },
    errors::EntitlementError,
    util::EntitlementsUtil,
    BackendApiDatasource, EntitlementsRepositoryImpl, InMemoryKeyValueDatasource,
    KeyValueDatasource, StoreDatasource,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

pub type TestUtil = EntitlementsUtil<EntitlementsRepositoryImpl<MockBackend, MockStore>>;

pub type Response = Result<LaunchResult, EntitlementError>;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

// Fixtures.

pub fn product(id: &str, sku: &str, duration_days: Option<u32>) -> Product {
    Product {
        id: ProductId::from(id),
        store_id: Some(StoreId::from(sku)),
        product_type: if duration_days.is_some() {
            ProductType::Subscription
        } else {
            ProductType::InApp
        },
        duration_days,
    }
}

pub fn purchase(sku: &str, order_id: &str, purchase_time: DateTime<Utc>) -> Purchase {
    Purchase {
        store_product_id: StoreId::from(sku),
        order_id: Some(order_id.to_string()),
        original_order_id: None,
        purchase_time,
        purchase_token: format!("token_{order_id}"),
        acknowledged: false,
        state: PurchaseState::Purchased,
    }
}

pub fn server_entitlement(
    id: &str,
    product_id: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Entitlement {
    Entitlement {
        id: EntitlementId::from(id),
        associated_product_id: ProductId::from(product_id),
        active: true,
        renew_state: RenewState::WillRenew,
        started_at: now(),
        expires_at,
        source: EntitlementSource::Server,
        grant_type: GrantType::Purchase,
    }
}

/// `prod_a` (30 day subscription, grants premium) and `prod_b` (lifetime,
/// grants noAds).
pub fn launch_result(entitlements: Vec<Entitlement>) -> LaunchResult {
    let products = [
        product("prod_a", "sku_a", Some(30)),
        product("prod_b", "sku_b", None),
    ];
    LaunchResult {
        uid: UserId::from("user_1"),
        timestamp: now(),
        products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        entitlements: entitlements.into_iter().map(|e| (e.id.clone(), e)).collect(),
        user_products: HashMap::new(),
        product_permissions: Some(HashMap::from([
            (
                ProductId::from("prod_a"),
                BTreeSet::from([EntitlementId::from("premium")]),
            ),
            (
                ProductId::from("prod_b"),
                BTreeSet::from([EntitlementId::from("noAds")]),
            ),
        ])),
    }
}

pub fn unavailable() -> EntitlementError {
    EntitlementError::from_status(503, "service unavailable".to_string())
}

pub fn ids(entitlements: &EntitlementMap) -> BTreeSet<String> {
    entitlements.keys().map(|id| id.0.clone()).collect()
}

// Mock backend.

/// Scripted responses per endpoint. The last scripted response repeats; an
/// endpoint with nothing scripted is unreachable.
#[derive(Default)]
struct Script {
    responses: Mutex<VecDeque<Response>>,
    calls: AtomicUsize,
}

impl Script {
    fn set(&self, responses: Vec<Response>) {
        *self.responses.lock() = responses.into();
    }

    fn next(&self) -> Response {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock();
        if responses.len() > 1 {
            return responses.pop_front().unwrap();
        }
        responses
            .front()
            .cloned()
            .unwrap_or_else(|| Err(EntitlementError::NetworkUnreachable("no route".into())))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockBackendState {
    init: Script,
    purchase: Script,
    restore: Script,
    delay: Mutex<Option<Duration>>,
    purchased: Mutex<Vec<(Purchase, Option<ProductId>)>>,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<MockBackendState>,
}

impl MockBackend {
    pub fn set_init(&self, responses: Vec<Response>) {
        self.state.init.set(responses);
    }

    pub fn set_purchase(&self, responses: Vec<Response>) {
        self.state.purchase.set(responses);
    }

    pub fn set_restore(&self, responses: Vec<Response>) {
        self.state.restore.set(responses);
    }

    /// Makes every call take `delay` (tokio time).
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = Some(delay);
    }

    pub fn clear_delay(&self) {
        *self.state.delay.lock() = None;
    }

    pub fn init_calls(&self) -> usize {
        self.state.init.calls()
    }

    pub fn purchase_calls(&self) -> usize {
        self.state.purchase.calls()
    }

    pub fn restore_calls(&self) -> usize {
        self.state.restore.calls()
    }

    pub fn purchased(&self) -> Vec<(Purchase, Option<ProductId>)> {
        self.state.purchased.lock().clone()
    }

    async fn wait(&self) {
        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl BackendApiDatasource for MockBackend {
    async fn init(
        &self,
        _install_date: DateTime<Utc>,
        _purchases: &[Purchase],
    ) -> Result<LaunchResult, EntitlementError> {
        self.wait().await;
        self.state.init.next()
    }

    async fn purchase(
        &self,
        _install_date: DateTime<Utc>,
        purchase: &Purchase,
        product_id: Option<&ProductId>,
    ) -> Result<LaunchResult, EntitlementError> {
        self.wait().await;
        self.state
            .purchased
            .lock()
            .push((purchase.clone(), product_id.cloned()));
        self.state.purchase.next()
    }

    async fn restore(
        &self,
        _install_date: DateTime<Utc>,
        _history: &[Purchase],
    ) -> Result<LaunchResult, EntitlementError> {
        self.wait().await;
        self.state.restore.next()
    }
}

// Mock store.

#[derive(Default)]
struct MockStoreState {
    confirmations: Mutex<HashMap<StoreId, Result<Purchase, EntitlementError>>>,
    active: Mutex<Vec<Purchase>>,
    history: Mutex<Vec<Purchase>>,
    gate: Mutex<Option<Arc<Notify>>>,
    purchase_calls: AtomicUsize,
    history_calls: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<MockStoreState>,
}

impl MockStore {
    /// What the billing flow for `sku` returns.
    pub fn confirm(&self, sku: &str, result: Result<Purchase, EntitlementError>) {
        self.state
            .confirmations
            .lock()
            .insert(StoreId::from(sku), result);
    }

    pub fn set_active(&self, purchases: Vec<Purchase>) {
        *self.state.active.lock() = purchases;
    }

    pub fn set_history(&self, purchases: Vec<Purchase>) {
        *self.state.history.lock() = purchases;
    }

    /// Holds every billing flow until `release` is called.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.gate.lock() = Some(gate.clone());
        gate
    }

    /// Lets held and future billing flows through.
    pub fn release(&self) {
        if let Some(gate) = self.state.gate.lock().take() {
            gate.notify_waiters();
        }
    }

    pub fn purchase_calls(&self) -> usize {
        self.state.purchase_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.state.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreDatasource for MockStore {
    async fn purchase(
        &self,
        product: &Product,
        _offer_id: Option<&str>,
    ) -> Result<Purchase, EntitlementError> {
        self.state.purchase_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let Some(store_id) = product.store_id.as_ref() else {
            return Err(EntitlementError::ProductNotFound(product.id.clone()));
        };
        self.state
            .confirmations
            .lock()
            .get(store_id)
            .cloned()
            .unwrap_or_else(|| Err(EntitlementError::ProductNotFound(product.id.clone())))
    }

    async fn query_active_purchases(&self) -> Result<Vec<Purchase>, EntitlementError> {
        Ok(self.state.active.lock().clone())
    }

    async fn query_purchase_history(
        &self,
        product_type: ProductType,
    ) -> Result<Vec<Purchase>, EntitlementError> {
        self.state.history_calls.fetch_add(1, Ordering::SeqCst);
        let subscription = |p: &&Purchase| p.store_product_id.0 == "sku_a";
        Ok(self
            .state
            .history
            .lock()
            .iter()
            .filter(|p| subscription(p) == (product_type == ProductType::Subscription))
            .cloned()
            .collect())
    }
}

// Harness.

pub struct Harness {
    pub util: TestUtil,
    pub backend: MockBackend,
    pub store: MockStore,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<dyn KeyValueDatasource>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_storage(config, Arc::new(InMemoryKeyValueDatasource::new()))
    }

    /// A fresh engine (as after an app restart) sharing `storage`.
    pub fn with_storage(config: EngineConfig, storage: Arc<dyn KeyValueDatasource>) -> Self {
        let backend = MockBackend::default();
        let store = MockStore::default();
        let clock = Arc::new(ManualClock::new(now()));
        let util = EntitlementsUtil::with_backend(
            config,
            backend.clone(),
            store.clone(),
            storage.clone(),
            clock.clone(),
        )
        .unwrap();
        Self {
            util,
            backend,
            store,
            clock,
            storage,
        }
    }

    /// An engine that already launched successfully with `entitlements`.
    pub async fn launched(entitlements: Vec<Entitlement>) -> Self {
        let harness = Self::new(config());
        harness
            .backend
            .set_init(vec![Ok(launch_result(entitlements))]);
        harness.util.launch().await.unwrap();
        harness
    }
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::new("test_project_key");
    config.rate_limit_max_requests = 100;
    config
}
