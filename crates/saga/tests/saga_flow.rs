//! End-to-end tests of the cart → order → payment → confirmation flow
//! against the in-memory store and in-process clients.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{AddressId, Money, OrderId, ProductId, UserId};
use domain::{Address, DomainError, NewProduct, OrderStatus, PaymentStatus};
use saga::{
    Actor, CartService, InMemoryPaymentProvider, LocalOrderClient, LocalProductClient,
    OrderLifecycle, PaymentReconciler, ReconciliationSweep, SagaError, StockCoordinator,
    WebhookOutcome, sign_payload,
};
use store::{AddressStore, InMemoryStore, PaymentStore, StockLedger};

const WEBHOOK_SECRET: &str = "whsec_flow_test";

struct TestHarness {
    store: InMemoryStore,
    carts: CartService<InMemoryStore>,
    orders: Arc<OrderLifecycle<InMemoryStore>>,
    order_client: Arc<LocalOrderClient<InMemoryStore>>,
    provider: Arc<InMemoryPaymentProvider>,
    payments: Arc<PaymentReconciler<InMemoryStore>>,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let products = LocalProductClient::new(Arc::new(store.clone()));
        let coordinator = StockCoordinator::new(Arc::new(products), 1);

        let carts = CartService::new(store.clone(), coordinator.clone());
        let orders = Arc::new(OrderLifecycle::new(store.clone(), coordinator));
        let order_client = Arc::new(LocalOrderClient::new(orders.clone()));
        let provider = Arc::new(InMemoryPaymentProvider::new());
        let payments = Arc::new(PaymentReconciler::new(
            store.clone(),
            order_client.clone(),
            provider.clone(),
            WEBHOOK_SECRET,
            "eur",
        ));

        Self {
            store,
            carts,
            orders,
            order_client,
            provider,
            payments,
        }
    }

    async fn product(&self, sku: &str, price: i64, stock: i64) -> ProductId {
        let product = NewProduct::new(
            sku,
            format!("Product {sku}"),
            Money::from_cents(price),
            "eur",
            stock,
        )
        .unwrap()
        .into_product(Utc::now());
        self.store.create_product(&product).await.unwrap();
        product.id
    }

    async fn stock(&self, product_id: ProductId) -> i64 {
        self.store.stock_of(product_id).await.unwrap()
    }

    /// Cart with 2 × A at 500 and 1 × B at 300, turned into an order.
    async fn standard_order(&self, user: UserId) -> (OrderId, ProductId, ProductId) {
        let a = self.product(&format!("A-{}", ProductId::new()), 500, 10).await;
        let b = self.product(&format!("B-{}", ProductId::new()), 300, 10).await;
        self.carts.add_item(user, a, 2).await.unwrap();
        self.carts.add_item(user, b, 1).await.unwrap();
        let order = self.orders.create_from_cart(user, None, None).await.unwrap();
        (order.id, a, b)
    }

    async fn deliver(
        &self,
        event_type: &str,
        intent_id: &str,
    ) -> Result<WebhookOutcome, SagaError> {
        let payload = format!(
            r#"{{"id":"evt_{intent_id}","type":"{event_type}","data":{{"object":{{"id":"{intent_id}"}}}}}}"#
        );
        let header =
            sign_payload(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
        self.payments.handle_webhook(payload.as_bytes(), &header).await
    }
}

// -- Order creation --

#[tokio::test]
async fn test_order_snapshots_cart_and_opens_new_cart() {
    let h = TestHarness::new();
    let user = UserId::new();
    let a = h.product("SKU-A", 500, 10).await;
    let b = h.product("SKU-B", 300, 10).await;

    h.carts.add_item(user, a, 2).await.unwrap();
    let cart = h.carts.add_item(user, b, 1).await.unwrap();

    let order = h.orders.create_from_cart(user, None, None).await.unwrap();
    assert_eq!(order.total, Money::from_cents(1300));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.cart_id, cart.id);
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.items[0].price, Money::from_cents(500));
    assert_eq!(order.items[1].price, Money::from_cents(300));

    let next = h.carts.get_cart(user).await.unwrap();
    assert_ne!(next.id, cart.id);
    assert!(next.is_empty());
    assert!(next.is_active());

    // Creating an order never touches stock.
    assert_eq!(h.stock(a).await, 10);
}

#[tokio::test]
async fn test_empty_cart_cannot_be_ordered() {
    let h = TestHarness::new();
    let user = UserId::new();
    h.carts.get_cart(user).await.unwrap();

    let err = h.orders.create_from_cart(user, None, None).await.unwrap_err();
    assert!(matches!(err, SagaError::Domain(DomainError::EmptyCart)));
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_order_rechecks_stock() {
    let h = TestHarness::new();
    let user = UserId::new();
    let a = h.product("SKU-A", 500, 5).await;
    h.carts.add_item(user, a, 3).await.unwrap();

    // Someone else buys most of the stock in between.
    h.store.reduce_stock(a, 4, None).await.unwrap();

    let err = h.orders.create_from_cart(user, None, None).await.unwrap_err();
    match err {
        SagaError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, a);
            assert_eq!(requested, 3);
            assert_eq!(available, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(h.store.order_count().await, 0);
    let cart = h.carts.get_cart(user).await.unwrap();
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn test_order_addresses_must_belong_to_user() {
    let h = TestHarness::new();
    let user = UserId::new();
    let other = UserId::new();
    let a = h.product("SKU-A", 500, 5).await;
    h.carts.add_item(user, a, 1).await.unwrap();

    let address = |owner: UserId| Address {
        id: AddressId::new(),
        user_id: owner,
        street: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip_code: "62701".to_string(),
        country: "US".to_string(),
        is_default: true,
    };
    let mine = address(user);
    let theirs = address(other);
    h.store.insert_address(&mine).await.unwrap();
    h.store.insert_address(&theirs).await.unwrap();

    let err = h
        .orders
        .create_from_cart(user, Some(mine.id), Some(theirs.id))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Forbidden(_)));

    let err = h
        .orders
        .create_from_cart(user, Some(AddressId::new()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::NotFound(_)));

    let order = h
        .orders
        .create_from_cart(user, Some(mine.id), Some(mine.id))
        .await
        .unwrap();
    assert_eq!(order.shipping_address.as_ref().map(|a| a.id), Some(mine.id));

    // Deleting the address later drops the detail, not the order.
    h.store.delete_address(mine.id).await.unwrap();
    let order = h.orders.get_order(order.id, user).await.unwrap();
    assert_eq!(order.shipping_address_id, Some(mine.id));
    assert!(order.shipping_address.is_none());
}

#[tokio::test]
async fn test_orders_are_owner_scoped() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;

    assert!(h.orders.get_order(order_id, user).await.is_ok());
    assert!(matches!(
        h.orders.get_order(order_id, UserId::new()).await,
        Err(SagaError::NotFound(_))
    ));
    assert_eq!(h.orders.list_orders(user).await.unwrap().len(), 1);
    assert!(h.orders.list_orders(UserId::new()).await.unwrap().is_empty());
}

// -- Status transitions --

#[tokio::test]
async fn test_confirm_twice_reduces_stock_once() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, a, b) = h.standard_order(user).await;

    let order = h
        .orders
        .update_status(order_id, OrderStatus::Confirmed, Actor::Internal)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);

    let again = h
        .orders
        .update_status(order_id, OrderStatus::Confirmed, Actor::Internal)
        .await
        .unwrap();
    assert_eq!(again.status, OrderStatus::Confirmed);

    assert_eq!(h.stock(a).await, 8);
    assert_eq!(h.stock(b).await, 9);
    assert_eq!(h.store.reduction_count().await, 2);
}

#[tokio::test]
async fn test_concurrent_confirms_reduce_stock_once() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, a, _) = h.standard_order(user).await;

    let (first, second) = tokio::join!(
        h.orders
            .update_status(order_id, OrderStatus::Confirmed, Actor::Internal),
        h.orders
            .update_status(order_id, OrderStatus::Confirmed, Actor::Internal),
    );
    assert_eq!(first.unwrap().status, OrderStatus::Confirmed);
    assert_eq!(second.unwrap().status, OrderStatus::Confirmed);
    assert_eq!(h.stock(a).await, 8);
}

#[tokio::test]
async fn test_failed_confirm_leaves_order_pending() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, a, b) = h.standard_order(user).await;

    // B sells out before payment lands.
    h.store.reduce_stock(b, 10, None).await.unwrap();

    for _ in 0..2 {
        let err = h
            .orders
            .update_status(order_id, OrderStatus::Confirmed, Actor::Internal)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::InsufficientStock { .. }));
    }

    let order = h.orders.get_order(order_id, user).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    // A was taken on the first attempt and skipped on the retry.
    assert_eq!(h.stock(a).await, 8);
    assert_eq!(h.stock(b).await, 0);
}

#[tokio::test]
async fn test_cancel_rules() {
    let h = TestHarness::new();
    let user = UserId::new();

    let (pending, _, _) = h.standard_order(user).await;
    let order = h.orders.cancel(pending, Actor::Owner(user)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let (confirmed, _, _) = h.standard_order(user).await;
    h.orders
        .update_status(confirmed, OrderStatus::Confirmed, Actor::Internal)
        .await
        .unwrap();
    let order = h.orders.cancel(confirmed, Actor::Owner(user)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let (shipped, _, _) = h.standard_order(user).await;
    h.orders
        .update_status(shipped, OrderStatus::Confirmed, Actor::Internal)
        .await
        .unwrap();
    h.orders
        .update_status(shipped, OrderStatus::Shipped, Actor::Admin)
        .await
        .unwrap();
    let err = h.orders.cancel(shipped, Actor::Owner(user)).await.unwrap_err();
    assert!(matches!(
        err,
        SagaError::Domain(DomainError::InvalidTransition { .. })
    ));
    let order = h.orders.get_order(shipped, user).await.unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn test_status_permissions() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;

    for actor in [Actor::Owner(user), Actor::Admin] {
        let err = h
            .orders
            .update_status(order_id, OrderStatus::Confirmed, actor)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Forbidden(_)));
    }

    let err = h
        .orders
        .cancel(order_id, Actor::Owner(UserId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::NotFound(_)));

    let err = h
        .orders
        .update_status(order_id, OrderStatus::Shipped, Actor::Admin)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SagaError::Domain(DomainError::InvalidTransition { .. })
    ));
}

// -- Payments --

#[tokio::test]
async fn test_second_intent_returns_existing_payment() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;

    let payment = h.payments.create_intent(order_id, user).await.unwrap();
    assert_eq!(payment.amount, Money::from_cents(1300));
    assert_eq!(payment.currency, "EUR");
    assert_eq!(payment.status, PaymentStatus::Pending);

    match h.payments.create_intent(order_id, user).await.unwrap_err() {
        SagaError::PaymentExists {
            payment_id,
            client_secret,
            provider_intent_id,
        } => {
            assert_eq!(payment_id, payment.id);
            assert_eq!(client_secret, payment.client_secret);
            assert_eq!(provider_intent_id, payment.provider_intent_id);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.provider.intent_count(), 1);
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_intents_create_one_payment() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;

    let (first, second) = tokio::join!(
        h.payments.create_intent(order_id, user),
        h.payments.create_intent(order_id, user),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(SagaError::PaymentExists { .. })))
            .count(),
        1
    );
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn test_intent_requires_owned_pending_order() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;

    let err = h
        .payments
        .create_intent(order_id, UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Forbidden(_)));

    h.orders.cancel(order_id, Actor::Owner(user)).await.unwrap();
    let err = h.payments.create_intent(order_id, user).await.unwrap_err();
    assert!(matches!(err, SagaError::Conflict(_)));

    let err = h
        .payments
        .create_intent(OrderId::new(), user)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::NotFound(_)));
    assert_eq!(h.provider.intent_count(), 0);
}

#[tokio::test]
async fn test_provider_failure_creates_no_payment() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;

    h.provider.set_fail_on_create(true);
    let err = h.payments.create_intent(order_id, user).await.unwrap_err();
    assert!(matches!(err, SagaError::Downstream { .. }));
    assert_eq!(h.store.payment_count().await, 0);

    h.provider.set_fail_on_create(false);
    assert!(h.payments.create_intent(order_id, user).await.is_ok());
}

#[tokio::test]
async fn test_payment_reads_are_owner_only() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();

    assert_eq!(
        h.payments.get_payment(payment.id, user).await.unwrap().id,
        payment.id
    );
    assert!(matches!(
        h.payments.get_payment(payment.id, UserId::new()).await,
        Err(SagaError::Forbidden(_))
    ));
}

// -- Webhooks --

#[tokio::test]
async fn test_succeeded_webhook_confirms_order_once() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, a, b) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();

    let outcome = h
        .deliver("payment_intent.succeeded", &payment.provider_intent_id)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let order = h.orders.get_order(order_id, user).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    let stored = h.store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Succeeded);
    assert!(stored.order_synced);
    assert_eq!(h.stock(a).await, 8);
    assert_eq!(h.stock(b).await, 9);

    // Provider retries the same event.
    let outcome = h
        .deliver("payment_intent.succeeded", &payment.provider_intent_id)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Replayed);
    assert_eq!(h.stock(a).await, 8);
    assert_eq!(h.stock(b).await, 9);
}

#[tokio::test]
async fn test_unknown_intent_is_a_local_error() {
    let h = TestHarness::new();
    let err = h
        .deliver("payment_intent.succeeded", "pi_missing")
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::NotFound(_)));

    // The handler keeps working afterwards.
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();
    assert_eq!(
        h.deliver("payment_intent.succeeded", &payment.provider_intent_id)
            .await
            .unwrap(),
        WebhookOutcome::Applied
    );
}

#[tokio::test]
async fn test_unverified_webhook_is_rejected() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();

    let payload = format!(
        r#"{{"id":"evt_1","type":"payment_intent.succeeded","data":{{"object":{{"id":"{}"}}}}}}"#,
        payment.provider_intent_id
    );
    let header = sign_payload(payload.as_bytes(), "whsec_wrong", Utc::now().timestamp()).unwrap();
    let err = h
        .payments
        .handle_webhook(payload.as_bytes(), &header)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InvalidSignature(_)));

    let stored = h.store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_failed_payment_leaves_order_and_allows_new_intent() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();

    let outcome = h
        .deliver("payment_intent.payment_failed", &payment.provider_intent_id)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let order = h.orders.get_order(order_id, user).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let retry = h.payments.create_intent(order_id, user).await.unwrap();
    assert_ne!(retry.id, payment.id);
    assert_eq!(h.provider.intent_count(), 2);
}

#[tokio::test]
async fn test_stale_and_unhandled_events_are_ignored() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();

    h.deliver("payment_intent.succeeded", &payment.provider_intent_id)
        .await
        .unwrap();
    let outcome = h
        .deliver("payment_intent.canceled", &payment.provider_intent_id)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);

    let outcome = h
        .deliver("charge.refunded", &payment.provider_intent_id)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);

    let stored = h.store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn test_unreachable_order_service_is_repaired_later() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, a, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();

    h.order_client.set_unreachable(true);
    let outcome = h
        .deliver("payment_intent.succeeded", &payment.provider_intent_id)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    // The payment succeeded even though the order could not be confirmed.
    let stored = h.store.get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Succeeded);
    assert!(!stored.order_synced);
    assert_eq!(
        h.orders.get_order(order_id, user).await.unwrap().status,
        OrderStatus::Pending
    );
    assert_eq!(h.payments.resync_unsynced(10).await.unwrap(), 0);

    h.order_client.set_unreachable(false);
    assert_eq!(h.payments.resync_unsynced(10).await.unwrap(), 1);
    assert_eq!(
        h.orders.get_order(order_id, user).await.unwrap().status,
        OrderStatus::Confirmed
    );
    assert_eq!(h.stock(a).await, 8);
    assert!(h.store.list_unsynced(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replayed_webhook_retries_unsynced_confirmation() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();

    h.order_client.set_unreachable(true);
    h.deliver("payment_intent.succeeded", &payment.provider_intent_id)
        .await
        .unwrap();
    h.order_client.set_unreachable(false);

    let outcome = h
        .deliver("payment_intent.succeeded", &payment.provider_intent_id)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Replayed);
    assert_eq!(
        h.orders.get_order(order_id, user).await.unwrap().status,
        OrderStatus::Confirmed
    );
}

#[tokio::test]
async fn test_refused_confirmation_does_not_starve_the_sweep() {
    let h = TestHarness::new();
    let user = UserId::new();

    // Paid after the owner cancelled: the order refuses confirmation.
    let (cancelled_id, _, _) = h.standard_order(user).await;
    let late = h.payments.create_intent(cancelled_id, user).await.unwrap();
    h.orders
        .cancel(cancelled_id, Actor::Owner(user))
        .await
        .unwrap();
    h.deliver("payment_intent.succeeded", &late.provider_intent_id)
        .await
        .unwrap();

    let stored = h.store.get_payment(late.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Succeeded);
    assert!(!stored.order_synced);
    assert!(stored.sync_blocked);

    // Paid while the order service was down: retryable.
    let (order_id, _, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();
    h.order_client.set_unreachable(true);
    h.deliver("payment_intent.succeeded", &payment.provider_intent_id)
        .await
        .unwrap();
    h.order_client.set_unreachable(false);

    let stored = h.store.get_payment(payment.id).await.unwrap().unwrap();
    assert!(!stored.sync_blocked);
    assert!(stored.last_sync_attempt_at.is_some());

    let sweep = ReconciliationSweep::new(h.payments.clone(), Duration::from_secs(60)).with_batch(1);
    assert_eq!(sweep.run_once().await.unwrap(), 1);
    assert_eq!(
        h.orders.get_order(order_id, user).await.unwrap().status,
        OrderStatus::Confirmed
    );
    assert_eq!(
        h.orders.get_order(cancelled_id, user).await.unwrap().status,
        OrderStatus::Cancelled
    );
    assert!(h.store.list_unsynced(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retryable_failures_rotate_through_small_batches() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (first_id, _, _) = h.standard_order(user).await;
    let first = h.payments.create_intent(first_id, user).await.unwrap();
    let (second_id, _, _) = h.standard_order(user).await;
    let second = h.payments.create_intent(second_id, user).await.unwrap();

    h.order_client.set_unreachable(true);
    h.deliver("payment_intent.succeeded", &first.provider_intent_id)
        .await
        .unwrap();
    h.deliver("payment_intent.succeeded", &second.provider_intent_id)
        .await
        .unwrap();

    // Still down: each pass tries one payment and moves it to the back.
    assert_eq!(h.payments.resync_unsynced(1).await.unwrap(), 0);
    let tried = h.store.list_unsynced(1).await.unwrap()[0].id;
    assert_eq!(h.payments.resync_unsynced(1).await.unwrap(), 0);
    assert_ne!(h.store.list_unsynced(1).await.unwrap()[0].id, tried);

    h.order_client.set_unreachable(false);
    assert_eq!(h.payments.resync_unsynced(1).await.unwrap(), 1);
    assert_eq!(h.payments.resync_unsynced(1).await.unwrap(), 1);
    for order_id in [first_id, second_id] {
        assert_eq!(
            h.orders.get_order(order_id, user).await.unwrap().status,
            OrderStatus::Confirmed
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_sweep_runs_on_interval() {
    let h = TestHarness::new();
    let user = UserId::new();
    let (order_id, _, _) = h.standard_order(user).await;
    let payment = h.payments.create_intent(order_id, user).await.unwrap();

    h.order_client.set_unreachable(true);
    h.deliver("payment_intent.succeeded", &payment.provider_intent_id)
        .await
        .unwrap();
    h.order_client.set_unreachable(false);

    let handle = ReconciliationSweep::new(h.payments.clone(), Duration::from_secs(60)).spawn();
    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.abort();

    assert_eq!(
        h.orders.get_order(order_id, user).await.unwrap().status,
        OrderStatus::Confirmed
    );
}
