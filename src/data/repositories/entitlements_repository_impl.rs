use std::{
    collections::{HashMap, HashSet},
    mem,
    sync::Arc,
};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::{
    data::{
        caches::{
            deduplication_cache::DeduplicationCache, entitlement_cache::EntitlementCache,
            pending_purchases_cache::PendingPurchasesCache,
        },
        datasources::{
            backend_api_datasource::BackendApiDatasource,
            key_value_datasource::KeyValueDatasource, store_datasource::StoreDatasource,
        },
        network::{
            rate_limiter::{argument_hash, RateLimiter},
            retry_coordinator::RetryCoordinator,
        },
        repositories::local_fallback_granter::LocalFallbackGranter,
    },
    domain::{
        entities::{
            entitlement::EntitlementMap,
            launch_result::{FallbackSnapshot, LaunchResult},
            product::{ProductId, ProductType, StoreId},
            purchase::{Purchase, PurchaseState},
            session_context::{AppState, SessionContext, UserId},
        },
        repositories::entitlements_repository::EntitlementsRepository,
    },
    errors::{EntitlementError, RequestType, StoreErrorCode},
};

const UPDATES_CAPACITY: usize = 16;

type Waiter = oneshot::Sender<Result<EntitlementMap, EntitlementError>>;

/// A caller waiting for the store to confirm a purchase.
struct InFlightPurchase {
    request_id: u64,
    product_id: ProductId,
    waiter: Waiter,
}

/// Everything read-then-written by concurrent purchase, restore and launch
/// flows. Only ever touched under the one mutex, never across an await.
struct OrchestratorState {
    in_flight: HashMap<StoreId, InFlightPurchase>,
    /// Dedup keys of purchases currently being sent to the backend.
    submitting: HashSet<String>,
    handled_purchases: DeduplicationCache,
    entitlement_cache: EntitlementCache,
    pending_purchases: PendingPurchasesCache,
    launch_error: Option<EntitlementError>,
    logout_pending: bool,
    restore_in_progress: bool,
    restore_waiters: Vec<Waiter>,
    next_request_id: u64,
}

impl OrchestratorState {
    fn cached_entitlements(&self) -> EntitlementMap {
        self.entitlement_cache
            .get_actual_entitlements()
            .unwrap_or_default()
    }

    /// A failed call without any cached launch result leaves nothing that can
    /// be trusted.
    fn clear_if_never_launched(&mut self) {
        if self.entitlement_cache.launch_result().is_none() {
            if let Err(e) = self.entitlement_cache.clear() {
                warn!("Failed to clear entitlement cache: {}", e);
            }
        }
    }
}

/// Removes a caller's in-flight entry if its `purchase` future is dropped
/// before the store answers. Entries of later callers are left alone.
struct InFlightGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
    store_id: StoreId,
    request_id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state
            .in_flight
            .get(&self.store_id)
            .is_some_and(|in_flight| in_flight.request_id == self.request_id)
        {
            debug!("Purchase of {} abandoned by its caller.", self.store_id);
            state.in_flight.remove(&self.store_id);
        }
    }
}

/// Holds a dedup key in `submitting` until the submission is resolved or
/// abandoned, so a dropped submission can be retried on the next delivery.
struct SubmissionGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
    key: String,
    released: bool,
}

impl SubmissionGuard<'_> {
    fn release(&mut self, state: &mut OrchestratorState) {
        state.submitting.remove(&self.key);
        self.released = true;
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            debug!("Submission of {} abandoned.", self.key);
            self.state.lock().submitting.remove(&self.key);
        }
    }
}

/// Owns the running restore. Whoever holds it resolves the coalesced
/// waiters; if it is dropped unfinished they fail and the next restore
/// starts afresh.
struct RestoreGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
    finished: bool,
}

impl RestoreGuard<'_> {
    fn finish(&mut self, result: &Result<EntitlementMap, EntitlementError>) {
        self.finished = true;
        for waiter in self.take_waiters() {
            let _ = waiter.send(result.clone());
        }
    }

    fn take_waiters(&self) -> Vec<Waiter> {
        let mut state = self.state.lock();
        state.restore_in_progress = false;
        mem::take(&mut state.restore_waiters)
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Restore abandoned by its caller.");
            for waiter in self.take_waiters() {
                let _ = waiter.send(Err(dropped_request()));
            }
        }
    }
}

/// Where a backend submission ended up once retries are exhausted.
#[derive(Debug)]
enum Submission {
    Acknowledged(LaunchResult),
    /// Transient failure; entitlements may be granted locally.
    Unreachable(EntitlementError),
    Failed(EntitlementError),
}

impl Submission {
    fn classify(outcome: Result<LaunchResult, EntitlementError>, analytics_mode: bool) -> Self {
        match outcome {
            Ok(result) => Submission::Acknowledged(result),
            Err(error) if error.is_fallback_eligible() && !analytics_mode => {
                Submission::Unreachable(error)
            }
            Err(error) => Submission::Failed(error),
        }
    }
}

pub struct EntitlementsRepositoryImpl<B: BackendApiDatasource, S: StoreDatasource> {
    backend: B,
    store: S,
    context: Arc<SessionContext>,
    retry_coordinator: RetryCoordinator,
    granter: LocalFallbackGranter,
    state: Mutex<OrchestratorState>,
    updates: broadcast::Sender<EntitlementMap>,
}

impl<B: BackendApiDatasource, S: StoreDatasource> EntitlementsRepositoryImpl<B, S> {
    pub(crate) fn new(
        backend: B,
        store: S,
        storage: Arc<dyn KeyValueDatasource>,
        context: Arc<SessionContext>,
        rate_limiter: Arc<dyn RateLimiter>,
        fallback: Option<FallbackSnapshot>,
    ) -> Result<Self, EntitlementError> {
        let state = OrchestratorState {
            in_flight: HashMap::new(),
            submitting: HashSet::new(),
            handled_purchases: DeduplicationCache::new(),
            entitlement_cache: EntitlementCache::new(storage.clone(), context.clone(), fallback)?,
            pending_purchases: PendingPurchasesCache::new(storage)?,
            launch_error: None,
            logout_pending: false,
            restore_in_progress: false,
            restore_waiters: Vec::new(),
            next_request_id: 0,
        };
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        Ok(Self {
            retry_coordinator: RetryCoordinator::new(context.config(), rate_limiter),
            granter: LocalFallbackGranter::new(context.clone()),
            backend,
            store,
            context,
            state: Mutex::new(state),
            updates,
        })
    }

    async fn handle_purchases(&self, purchases: Vec<Purchase>) {
        join_all(purchases.into_iter().map(|p| self.handle_purchase(p))).await;
    }

    /// Takes one store transaction from confirmation to a resolved waiter (or
    /// a published update when nobody is waiting).
    async fn handle_purchase(&self, purchase: Purchase) {
        let store_id = purchase.store_product_id.clone();
        let key = purchase.dedup_key().to_string();

        let product_id = {
            let mut state = self.state.lock();
            let rejection = match purchase.state {
                PurchaseState::Purchased => None,
                PurchaseState::Pending => Some(EntitlementError::store(
                    StoreErrorCode::Pending,
                    "purchase is awaiting payment",
                )),
                PurchaseState::Unspecified => Some(EntitlementError::store(
                    StoreErrorCode::Unspecified,
                    "purchase is in an unknown state",
                )),
            };
            if let Some(error) = rejection {
                debug!("Not submitting {:?} purchase of {}.", purchase.state, store_id);
                if let Some(in_flight) = state.in_flight.remove(&store_id) {
                    let _ = in_flight.waiter.send(Err(error));
                }
                return;
            }

            if state.submitting.contains(&key) {
                debug!("Purchase {} is already being submitted.", key);
                return;
            }
            if !state.handled_purchases.should_process(&purchase) {
                debug!("Purchase {} was already handled, skipping.", key);
                if let Err(e) = state.pending_purchases.remove(&purchase) {
                    warn!("Failed to update pending purchases: {}", e);
                }
                if let Some(in_flight) = state.in_flight.remove(&store_id) {
                    let _ = in_flight.waiter.send(Ok(state.cached_entitlements()));
                }
                return;
            }

            state.submitting.insert(key.clone());
            let product_id = state
                .in_flight
                .get(&store_id)
                .map(|in_flight| in_flight.product_id.clone())
                .or_else(|| {
                    state
                        .entitlement_cache
                        .product_by_store_id(&store_id)
                        .map(|product| product.id.clone())
                });
            product_id
        };
        let mut submission = SubmissionGuard {
            state: &self.state,
            key: key.clone(),
            released: false,
        };

        debug!("Submitting purchase {} to the backend.", key);
        let install_date = self.context.install_date();
        let outcome = self
            .retry_coordinator
            .execute(RequestType::Purchase, argument_hash(&purchase), || {
                self.backend
                    .purchase(install_date, &purchase, product_id.as_ref())
            })
            .await;

        let (result, in_flight) = {
            let mut state = self.state.lock();
            submission.release(&mut state);
            if matches!(&outcome, Err(e) if e.is_retryable()) {
                if let Err(e) = state.pending_purchases.save(&purchase) {
                    warn!("Failed to remember pending purchase {}: {}", key, e);
                }
            }

            let result = match Submission::classify(outcome, self.context.is_analytics_mode()) {
                Submission::Acknowledged(launch_result) => {
                    info!("Backend acknowledged purchase {}.", key);
                    let entitlements = launch_result.entitlements.clone();
                    state.handled_purchases.mark_processed(&purchase);
                    if let Err(e) = state.pending_purchases.remove(&purchase) {
                        warn!("Failed to update pending purchases: {}", e);
                    }
                    state
                        .entitlement_cache
                        .save(launch_result)
                        .map(|_| entitlements)
                }
                Submission::Unreachable(error) => {
                    warn!(
                        "Backend unreachable for purchase {} ({}), granting locally.",
                        key, error
                    );
                    self.granter.grant_after_failed_purchase(
                        &mut state.entitlement_cache,
                        &purchase,
                        product_id.as_ref(),
                        error,
                    )
                }
                Submission::Failed(error) => {
                    warn!("Purchase {} failed: {}", key, error);
                    state.clear_if_never_launched();
                    Err(error)
                }
            };
            (result, state.in_flight.remove(&store_id))
        };

        match in_flight {
            Some(in_flight) => {
                let _ = in_flight.waiter.send(result);
            }
            None => match result {
                Ok(entitlements) => {
                    let _ = self.updates.send(entitlements);
                }
                Err(e) => warn!("Unrequested purchase {} could not be processed: {}", key, e),
            },
        }
    }

    async fn perform_restore(&self) -> Result<EntitlementMap, EntitlementError> {
        let (subscriptions, in_apps) = futures::join!(
            self.store.query_purchase_history(ProductType::Subscription),
            self.store.query_purchase_history(ProductType::InApp),
        );
        let mut history = subscriptions?;
        history.extend(in_apps?);

        debug!("Restoring {} history records.", history.len());
        let install_date = self.context.install_date();
        let outcome = self
            .retry_coordinator
            .execute(RequestType::Restore, argument_hash(&history), || {
                self.backend.restore(install_date, &history)
            })
            .await;

        let mut state = self.state.lock();
        match Submission::classify(outcome, self.context.is_analytics_mode()) {
            Submission::Acknowledged(launch_result) => {
                let entitlements = launch_result.entitlements.clone();
                state.entitlement_cache.save(launch_result)?;
                info!("Restored {} entitlements.", entitlements.len());
                Ok(entitlements)
            }
            Submission::Unreachable(error) => {
                warn!("Backend unreachable for restore ({}), granting locally.", error);
                self.granter.grant_after_failed_restore(
                    &mut state.entitlement_cache,
                    &history,
                    error,
                )
            }
            Submission::Failed(error) => {
                warn!("Restore failed: {}", error);
                state.clear_if_never_launched();
                Err(error)
            }
        }
    }

    fn resolve_in_flight(
        &self,
        store_id: &StoreId,
        result: Result<EntitlementMap, EntitlementError>,
    ) {
        let in_flight = self.state.lock().in_flight.remove(store_id);
        if let Some(in_flight) = in_flight {
            let _ = in_flight.waiter.send(result);
        }
    }

    async fn resend_pending_purchases(&self) -> bool {
        let pending = self.state.lock().pending_purchases.all();
        if pending.is_empty() {
            return false;
        }
        info!("Resending {} pending purchase(s).", pending.len());
        self.handle_purchases(pending).await;
        true
    }
}

fn dropped_request() -> EntitlementError {
    EntitlementError::store(
        StoreErrorCode::Other,
        "request was dropped before completion",
    )
}

#[async_trait]
impl<B: BackendApiDatasource, S: StoreDatasource> EntitlementsRepository
    for EntitlementsRepositoryImpl<B, S>
{
    async fn launch(&self) -> Result<EntitlementMap, EntitlementError> {
        let purchases = match self.store.query_active_purchases().await {
            Ok(purchases) => purchases
                .into_iter()
                .filter(|p| p.state == PurchaseState::Purchased)
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!("Could not query active purchases, launching without them: {}", e);
                Vec::new()
            }
        };

        let install_date = self.context.install_date();
        let outcome = self
            .retry_coordinator
            .execute_once(RequestType::Init, argument_hash(&purchases), || {
                self.backend.init(install_date, &purchases)
            })
            .await;

        let entitlements = {
            let mut state = self.state.lock();
            match outcome {
                Ok(launch_result) => {
                    let entitlements = launch_result.entitlements.clone();
                    state.entitlement_cache.save(launch_result)?;
                    state.handled_purchases.mark_all_processed(&purchases);
                    state.launch_error = None;
                    state.logout_pending = false;
                    info!("Launched with {} entitlements.", entitlements.len());
                    entitlements
                }
                Err(error) => {
                    warn!("Launch failed: {}", error);
                    state.launch_error = Some(error.clone());
                    return Err(error);
                }
            }
        };

        if self.resend_pending_purchases().await {
            return Ok(self.state.lock().cached_entitlements());
        }
        Ok(entitlements)
    }

    async fn purchase(
        &self,
        product_id: &ProductId,
        offer_id: Option<&str>,
    ) -> Result<EntitlementMap, EntitlementError> {
        let (product, store_id, request_id, receiver) = {
            let mut state = self.state.lock();
            let product = match state.entitlement_cache.product(product_id) {
                Some(product) => product.clone(),
                None if state.entitlement_cache.products().is_none() => {
                    return Err(state
                        .launch_error
                        .clone()
                        .unwrap_or_else(|| EntitlementError::ProductNotFound(product_id.clone())));
                }
                None => return Err(EntitlementError::ProductNotFound(product_id.clone())),
            };
            let Some(store_id) = product.store_id.clone() else {
                return Err(EntitlementError::ProductNotFound(product_id.clone()));
            };
            if state.in_flight.contains_key(&store_id) {
                info!("Purchase of {} already in progress, rejecting.", store_id);
                return Err(EntitlementError::AlreadyInProgress(store_id));
            }

            let request_id = state.next_request_id;
            state.next_request_id += 1;
            let (waiter, receiver) = oneshot::channel();
            state.in_flight.insert(
                store_id.clone(),
                InFlightPurchase {
                    request_id,
                    product_id: product_id.clone(),
                    waiter,
                },
            );
            (product, store_id, request_id, receiver)
        };
        let _in_flight = InFlightGuard {
            state: &self.state,
            store_id: store_id.clone(),
            request_id,
        };

        debug!("Awaiting store confirmation for {}.", store_id);
        match self.store.purchase(&product, offer_id).await {
            Ok(purchase) if purchase.store_product_id == store_id => {
                self.handle_purchase(purchase).await;
            }
            Ok(purchase) => {
                let error = EntitlementError::store(
                    StoreErrorCode::Other,
                    &format!(
                        "store confirmed {} instead of {}",
                        purchase.store_product_id, store_id
                    ),
                );
                self.resolve_in_flight(&store_id, Err(error));
                self.handle_purchase(purchase).await;
            }
            Err(error) => {
                debug!("Store rejected purchase of {}: {}", store_id, error);
                self.resolve_in_flight(&store_id, Err(error));
            }
        }

        receiver.await.unwrap_or_else(|_| Err(dropped_request()))
    }

    async fn restore(&self) -> Result<EntitlementMap, EntitlementError> {
        let receiver = {
            let mut state = self.state.lock();
            if state.restore_in_progress {
                let (waiter, receiver) = oneshot::channel();
                state.restore_waiters.push(waiter);
                Some(receiver)
            } else {
                state.restore_in_progress = true;
                None
            }
        };
        if let Some(receiver) = receiver {
            debug!("Restore already running, awaiting its outcome.");
            return receiver.await.unwrap_or_else(|_| Err(dropped_request()));
        }

        let mut running = RestoreGuard {
            state: &self.state,
            finished: false,
        };
        let result = self.perform_restore().await;
        running.finish(&result);
        result
    }

    async fn check_entitlements(&self) -> Result<EntitlementMap, EntitlementError> {
        let cached = {
            let state = self.state.lock();
            if state.launch_error.is_some() || state.logout_pending {
                None
            } else {
                state.entitlement_cache.get_actual_entitlements()
            }
        };
        if let Some(entitlements) = cached {
            return Ok(entitlements);
        }

        debug!("Cached entitlements unusable, relaunching.");
        match self.launch().await {
            Ok(entitlements) => Ok(entitlements),
            Err(error) => self
                .state
                .lock()
                .entitlement_cache
                .get_actual_entitlements()
                .ok_or(error),
        }
    }

    async fn on_purchases_updated(&self, purchases: Vec<Purchase>) {
        debug!("Store reported {} purchase update(s).", purchases.len());
        self.handle_purchases(purchases).await;
    }

    fn on_purchases_failed(&self, purchases: &[Purchase], error: EntitlementError) {
        let failed = {
            let mut state = self.state.lock();
            if purchases.is_empty() {
                state.in_flight.drain().map(|(_, p)| p).collect::<Vec<_>>()
            } else {
                purchases
                    .iter()
                    .filter_map(|p| state.in_flight.remove(&p.store_product_id))
                    .collect()
            }
        };
        debug!("Failing {} in-flight purchase(s): {}", failed.len(), error);
        for in_flight in failed {
            let _ = in_flight.waiter.send(Err(error.clone()));
        }
    }

    async fn identify(&self, user_id: UserId) -> Result<EntitlementMap, EntitlementError> {
        if self.context.uid() == user_id {
            return self.check_entitlements().await;
        }
        info!("Switching user to {}.", user_id);
        self.context.set_uid(user_id);
        self.state.lock().entitlement_cache.clear()?;
        self.launch().await
    }

    fn logout(&self) -> Result<(), EntitlementError> {
        info!("Logging out, switching to an anonymous user.");
        self.context.set_uid(UserId::anonymous());
        let mut state = self.state.lock();
        state.entitlement_cache.clear()?;
        state.logout_pending = true;
        Ok(())
    }

    async fn on_app_foreground(&self) {
        self.context.set_app_state(AppState::Foreground);
        match self.store.query_active_purchases().await {
            Ok(purchases) => self.handle_purchases(purchases).await,
            Err(e) => warn!("Could not query active purchases on foreground: {}", e),
        }
    }

    fn on_app_background(&self) {
        self.context.set_app_state(AppState::Background);
    }

    fn subscribe_entitlement_updates(&self) -> broadcast::Receiver<EntitlementMap> {
        self.updates.subscribe()
    }
}
