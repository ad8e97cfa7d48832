mod common;

use std::{sync::Arc, time::Duration as StdDuration};

use chrono::Duration;
use common::*;
use entitlement_engine::{
    domain::entities::{
        entitlement::{EntitlementId, EntitlementSource},
        product::{ProductId, StoreId},
        purchase::PurchaseState,
    },
    errors::{EntitlementError, StoreErrorCode},
};

fn prod(id: &str) -> ProductId {
    ProductId::from(id)
}

fn canceled() -> EntitlementError {
    EntitlementError::StoreError {
        code: StoreErrorCode::Canceled,
        message: "user canceled".to_string(),
    }
}

#[tokio::test]
async fn test_purchase_returns_server_entitlements() {
    let h = Harness::launched(vec![]).await;
    h.store
        .confirm("sku_a", Ok(purchase("sku_a", "GPA.1", now())));
    h.backend.set_purchase(vec![Ok(launch_result(vec![server_entitlement(
        "premium",
        "prod_a",
        Some(now() + Duration::days(30)),
    )]))]);

    let entitlements = h.util.purchase(&prod("prod_a"), None).await.unwrap();
    assert_eq!(
        entitlements[&EntitlementId::from("premium")].source,
        EntitlementSource::Server
    );
    assert_eq!(h.backend.purchased()[0].1, Some(prod("prod_a")));

    assert_eq!(h.util.check_entitlements().await.unwrap(), entitlements);
    assert_eq!(h.backend.init_calls(), 1);
}

#[tokio::test]
async fn test_repeated_store_callbacks_submit_once() {
    let h = Harness::launched(vec![]).await;
    let p = purchase("sku_b", "GPA.7", now());
    h.backend.set_purchase(vec![Ok(launch_result(vec![server_entitlement(
        "noAds", "prod_b", None,
    )]))]);

    h.util
        .on_purchases_updated(vec![p.clone(), p.clone()])
        .await;
    h.util.on_purchases_updated(vec![p.clone()]).await;
    h.util.on_purchases_updated(vec![p]).await;

    assert_eq!(h.backend.purchase_calls(), 1);
}

#[tokio::test]
async fn test_second_purchase_of_same_product_is_rejected() {
    let h = Harness::launched(vec![]).await;
    let gate = h.store.hold();
    h.store
        .confirm("sku_a", Ok(purchase("sku_a", "GPA.1", now())));
    h.backend.set_purchase(vec![Ok(launch_result(vec![server_entitlement(
        "premium", "prod_a", None,
    )]))]);

    let prod_a = prod("prod_a");
    let first = h.util.purchase(&prod_a, None);
    let second = async {
        let result = h.util.purchase(&prod_a, None).await;
        gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok());
    assert_eq!(
        second,
        Err(EntitlementError::AlreadyInProgress(StoreId::from("sku_a")))
    );
    assert_eq!(h.store.purchase_calls(), 1);
    assert_eq!(h.backend.purchase_calls(), 1);
}

#[tokio::test]
async fn test_purchase_before_launch_returns_launch_error() {
    let h = Harness::new(config());
    h.backend.set_init(vec![Err(unavailable())]);
    assert!(h.util.launch().await.is_err());

    let result = h.util.purchase(&prod("prod_a"), None).await;
    assert_eq!(result, Err(unavailable()));
    assert_eq!(h.store.purchase_calls(), 0);
}

#[tokio::test]
async fn test_unknown_product() {
    let h = Harness::launched(vec![]).await;
    let result = h.util.purchase(&prod("prod_z"), None).await;
    assert_eq!(result, Err(EntitlementError::ProductNotFound(prod("prod_z"))));
    assert_eq!(h.store.purchase_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_backend_without_permissions_fails() {
    let mut result = launch_result(vec![server_entitlement("old", "prod_b", None)]);
    result.product_permissions = None;
    let h = Harness::new(config());
    h.backend.set_init(vec![Ok(result)]);
    h.util.launch().await.unwrap();
    h.store
        .confirm("sku_a", Ok(purchase("sku_a", "GPA.1", now())));

    let result = h.util.purchase(&prod("prod_a"), None).await;
    assert!(matches!(result, Err(EntitlementError::NetworkUnreachable(_))));
    assert_eq!(h.backend.purchase_calls(), 4);

    // The cached entitlements were dropped, so a relaunch is needed.
    h.backend.set_init(vec![Ok(launch_result(vec![]))]);
    h.util.check_entitlements().await.unwrap();
    assert_eq!(h.backend.init_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_grants_locally() {
    let h = Harness::launched(vec![]).await;
    let purchase_time = now() - Duration::hours(1);
    h.store
        .confirm("sku_a", Ok(purchase("sku_a", "GPA.1", purchase_time)));
    h.backend.set_purchase(vec![Err(unavailable())]);

    let entitlements = h.util.purchase(&prod("prod_a"), None).await.unwrap();

    assert_eq!(ids(&entitlements), ["premium".to_string()].into());
    let premium = &entitlements[&EntitlementId::from("premium")];
    assert!(premium.active);
    assert_eq!(premium.source, EntitlementSource::LocalFallback);
    assert_eq!(premium.expires_at, Some(purchase_time + Duration::days(30)));
    assert_eq!(h.backend.purchase_calls(), 4);
    assert_eq!(h.util.check_entitlements().await.unwrap(), entitlements);
}

#[tokio::test]
async fn test_client_error_never_grants_locally() {
    let h = Harness::launched(vec![server_entitlement("premium", "prod_a", None)]).await;
    h.store
        .confirm("sku_b", Ok(purchase("sku_b", "GPA.2", now())));
    h.backend.set_purchase(vec![Err(EntitlementError::from_status(
        401,
        "invalid project key".to_string(),
    ))]);

    let result = h.util.purchase(&prod("prod_b"), None).await;
    assert!(matches!(
        result,
        Err(EntitlementError::BackendClientError { status: 401, .. })
    ));
    assert_eq!(h.backend.purchase_calls(), 1);

    let cached = h.util.check_entitlements().await.unwrap();
    assert_eq!(ids(&cached), ["premium".to_string()].into());
    assert_eq!(h.backend.init_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_analytics_mode_never_grants_locally() {
    let mut config = config();
    config.analytics_mode = true;
    let h = Harness::new(config);
    h.backend.set_init(vec![Ok(launch_result(vec![]))]);
    h.util.launch().await.unwrap();
    h.store
        .confirm("sku_a", Ok(purchase("sku_a", "GPA.1", now())));
    h.backend.set_purchase(vec![Err(unavailable())]);

    let result = h.util.purchase(&prod("prod_a"), None).await;
    assert_eq!(result, Err(unavailable()));
}

#[tokio::test]
async fn test_pending_purchase_is_not_submitted() {
    let h = Harness::launched(vec![]).await;
    let mut pending = purchase("sku_a", "GPA.1", now());
    pending.state = PurchaseState::Pending;
    h.store.confirm("sku_a", Ok(pending));

    let result = h.util.purchase(&prod("prod_a"), None).await;
    assert!(matches!(
        result,
        Err(EntitlementError::StoreError {
            code: StoreErrorCode::Pending,
            ..
        })
    ));
    assert_eq!(h.backend.purchase_calls(), 0);
}

#[tokio::test]
async fn test_store_failure_callback_resolves_waiter() {
    let h = Harness::launched(vec![]).await;
    let gate = h.store.hold();
    h.store.confirm(
        "sku_a",
        Err(EntitlementError::StoreError {
            code: StoreErrorCode::ServiceUnavailable,
            message: "billing unavailable".to_string(),
        }),
    );

    let prod_a = prod("prod_a");
    let purchase = h.util.purchase(&prod_a, None);
    let fail = async {
        h.util.on_purchases_failed(&[], canceled());
        gate.notify_one();
    };
    let (result, _) = tokio::join!(purchase, fail);

    assert_eq!(result, Err(canceled()));
    assert_eq!(h.backend.purchase_calls(), 0);
}

#[tokio::test]
async fn test_already_handled_purchase_is_not_resent_after_restart() {
    let h = Harness::launched(vec![]).await;
    let p = purchase("sku_b", "GPA.9", now());
    let lifetime = launch_result(vec![server_entitlement("noAds", "prod_b", None)]);
    h.store.confirm("sku_b", Ok(p.clone()));
    h.backend.set_purchase(vec![Ok(lifetime.clone())]);

    let entitlements = h.util.purchase(&prod("prod_b"), None).await.unwrap();
    h.util.on_purchases_updated(vec![p.clone()]).await;
    assert_eq!(h.backend.purchase_calls(), 1);
    assert_eq!(h.util.check_entitlements().await.unwrap(), entitlements);

    let restarted = Harness::with_storage(config(), Arc::clone(&h.storage));
    restarted.store.set_active(vec![p.clone()]);
    restarted.backend.set_init(vec![Ok(lifetime)]);
    restarted.util.launch().await.unwrap();
    restarted.util.on_purchases_updated(vec![p]).await;

    assert_eq!(restarted.backend.purchase_calls(), 0);
    assert_eq!(
        restarted.util.check_entitlements().await.unwrap(),
        entitlements
    );
}

#[tokio::test]
async fn test_unrequested_purchase_is_published() {
    let h = Harness::launched(vec![]).await;
    let mut updates = h.util.subscribe_entitlement_updates();
    h.backend.set_purchase(vec![Ok(launch_result(vec![server_entitlement(
        "noAds", "prod_b", None,
    )]))]);

    h.util
        .on_purchases_updated(vec![purchase("sku_b", "GPA.3", now())])
        .await;

    let published = updates.try_recv().unwrap();
    assert_eq!(ids(&published), ["noAds".to_string()].into());
    assert_eq!(h.backend.purchased()[0].1, Some(prod("prod_b")));
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_purchase_is_resent_after_launch() {
    let h = Harness::launched(vec![]).await;
    h.store
        .confirm("sku_a", Ok(purchase("sku_a", "GPA.1", now())));
    h.backend.set_purchase(vec![Err(unavailable())]);
    h.util.purchase(&prod("prod_a"), None).await.unwrap();

    let expires_at = now() + Duration::days(30);
    h.backend.set_purchase(vec![Ok(launch_result(vec![server_entitlement(
        "premium",
        "prod_a",
        Some(expires_at),
    )]))]);
    let entitlements = h.util.launch().await.unwrap();

    let premium = &entitlements[&EntitlementId::from("premium")];
    assert_eq!(premium.source, EntitlementSource::Server);
    assert_eq!(premium.expires_at, Some(expires_at));
    assert_eq!(h.backend.purchase_calls(), 5);

    // Acknowledged now, so the next launch has nothing to resend.
    h.util.launch().await.unwrap();
    assert_eq!(h.backend.purchase_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_reconciles_locally_granted_purchase() {
    let h = Harness::launched(vec![]).await;
    let p = purchase("sku_a", "GPA.1", now());
    h.store.confirm("sku_a", Ok(p.clone()));
    h.backend.set_purchase(vec![Err(unavailable())]);
    h.util.purchase(&prod("prod_a"), None).await.unwrap();

    h.backend.set_purchase(vec![Ok(launch_result(vec![server_entitlement(
        "premium", "prod_a", None,
    )]))]);
    h.store.set_active(vec![p]);
    h.util.on_app_foreground().await;

    let cached = h.util.check_entitlements().await.unwrap();
    assert_eq!(
        cached[&EntitlementId::from("premium")].source,
        EntitlementSource::Server
    );
    assert_eq!(h.backend.purchase_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_purchase_frees_the_product() {
    let h = Harness::launched(vec![]).await;
    h.store.hold();
    h.store
        .confirm("sku_a", Ok(purchase("sku_a", "GPA.1", now())));
    h.backend.set_purchase(vec![Ok(launch_result(vec![server_entitlement(
        "premium", "prod_a", None,
    )]))]);

    let prod_a = prod("prod_a");
    let abandoned =
        tokio::time::timeout(StdDuration::from_secs(1), h.util.purchase(&prod_a, None)).await;
    assert!(abandoned.is_err());

    h.store.release();
    let entitlements = h.util.purchase(&prod_a, None).await.unwrap();
    assert_eq!(ids(&entitlements), ["premium".to_string()].into());
    assert_eq!(h.store.purchase_calls(), 2);
    assert_eq!(h.backend.purchase_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_submission_is_retried_on_next_delivery() {
    let h = Harness::launched(vec![]).await;
    let p = purchase("sku_b", "GPA.3", now());
    h.backend.set_purchase(vec![Ok(launch_result(vec![server_entitlement(
        "noAds", "prod_b", None,
    )]))]);
    h.backend.set_delay(StdDuration::from_secs(10));

    let abandoned = tokio::time::timeout(
        StdDuration::from_secs(1),
        h.util.on_purchases_updated(vec![p.clone()]),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(h.backend.purchase_calls(), 0);

    h.backend.clear_delay();
    let mut updates = h.util.subscribe_entitlement_updates();
    h.util.on_purchases_updated(vec![p]).await;

    assert_eq!(ids(&updates.try_recv().unwrap()), ["noAds".to_string()].into());
    assert_eq!(h.backend.purchase_calls(), 1);
}
