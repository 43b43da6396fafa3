//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{AddressId, Money, OrderId, PaymentId, ProductId, UserId};
use domain::{
    Address, CartItem, DomainError, NewProduct, OrderStatus, Payment, PaymentStatus, Product,
    ProductStatus, Role,
};
use sqlx::PgPool;
use store::{
    AddressStore, CartStore, CartStoreExt, OrderStore, PaymentStore, PostgresStore, StockLedger,
    StockReduction, StoreError, UserStore,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_schema.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE payments, order_items, orders, cart_items, carts, stock_reductions, products, addresses, users",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

async fn seed_product(store: &PostgresStore, sku: &str, cents: i64, stock: i64) -> Product {
    let product = NewProduct::new(sku, format!("Product {sku}"), Money::from_cents(cents), "eur", stock)
        .unwrap()
        .into_product(Utc::now());
    store.create_product(&product).await.unwrap();
    product
}

fn line(product: &Product, qty: u32) -> CartItem {
    CartItem {
        product_id: product.id,
        product_name: product.name.clone(),
        quantity: qty,
        price: product.price,
    }
}

#[tokio::test]
async fn product_round_trip_and_status() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-A", 500, 5).await;

    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.sku, "SKU-A");
    assert_eq!(loaded.price.cents(), 500);
    assert_eq!(loaded.currency, "EUR");

    let updated = store
        .set_product_status(product.id, ProductStatus::Inactive)
        .await
        .unwrap();
    assert_eq!(updated.status, ProductStatus::Inactive);

    let check = store.check_availability(product.id, 1).await.unwrap();
    assert!(!check.available);
    assert_eq!(check.available_qty, 5);
}

#[tokio::test]
async fn duplicate_sku_is_conflict() {
    let store = get_test_store().await;
    seed_product(&store, "SKU-A", 500, 5).await;

    let dup = NewProduct::new("SKU-A", "Other", Money::from_cents(100), "eur", 1)
        .unwrap()
        .into_product(Utc::now());
    assert!(matches!(
        store.create_product(&dup).await,
        Err(StoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn update_list_and_sku_lookup() {
    let store = get_test_store().await;
    let first = seed_product(&store, "SKU-A", 500, 5).await;
    seed_product(&store, "SKU-B", 700, 1).await;

    let update = NewProduct::new("SKU-A", "Renamed", Money::from_cents(650), "usd", 9).unwrap();
    let updated = store.update_product(&update).await.unwrap();
    assert_eq!(updated.id, first.id);
    assert_eq!(updated.price.cents(), 650);
    assert_eq!(updated.currency, "USD");
    assert_eq!(updated.stock_qty, 9);
    assert!(updated.updated_at.is_some());

    let by_sku = store.get_product_by_sku("SKU-A").await.unwrap().unwrap();
    assert_eq!(by_sku.name, "Renamed");
    assert!(store.get_product_by_sku("SKU-Z").await.unwrap().is_none());

    let skus: Vec<String> = store
        .list_products()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.sku)
        .collect();
    assert_eq!(skus.len(), 2);
    assert!(skus.contains(&"SKU-B".to_string()));

    let missing = NewProduct::new("SKU-Z", "Ghost", Money::from_cents(1), "eur", 0).unwrap();
    assert!(matches!(
        store.update_product(&missing).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn reduce_stock_rejects_overdraw() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-A", 500, 3).await;

    assert_eq!(
        store.reduce_stock(product.id, 3, None).await.unwrap(),
        StockReduction::Applied { remaining: 0 }
    );

    let err = store.reduce_stock(product.id, 1, None).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InsufficientStock {
            requested: 1,
            available: 0,
            ..
        }
    ));

    let err = store
        .reduce_stock(ProductId::new(), 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn concurrent_reductions_never_overdraw() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-A", 500, 10).await;

    let tasks: Vec<_> = (0..25)
        .map(|_| {
            let store = store.clone();
            let product_id = product.id;
            tokio::spawn(async move { store.reduce_stock(product_id, 1, None).await })
        })
        .collect();

    let results = futures_util::future::join_all(tasks).await;
    let succeeded = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(StockReduction::Applied { .. }))))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(StoreError::InsufficientStock { .. }))))
        .count();

    assert_eq!(succeeded, 10);
    assert_eq!(rejected, 15);

    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.stock_qty, 0);
}

#[tokio::test]
async fn keyed_reduction_is_applied_once_under_concurrency() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-A", 500, 10).await;
    let order_id = OrderId::new();

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            let product_id = product.id;
            tokio::spawn(async move { store.reduce_stock(product_id, 2, Some(order_id)).await })
        })
        .collect();

    let results = futures_util::future::join_all(tasks).await;
    let applied = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(StockReduction::Applied { .. }))))
        .count();
    assert_eq!(applied, 1);

    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.stock_qty, 8);
}

#[tokio::test]
async fn failed_keyed_reduction_can_be_retried() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-A", 500, 1).await;
    let order_id = OrderId::new();

    assert!(
        store
            .reduce_stock(product.id, 2, Some(order_id))
            .await
            .is_err()
    );

    sqlx::query("UPDATE products SET stock_qty = 5 WHERE id = $1")
        .bind(product.id.as_uuid())
        .execute(store.pool())
        .await
        .unwrap();

    assert_eq!(
        store
            .reduce_stock(product.id, 2, Some(order_id))
            .await
            .unwrap(),
        StockReduction::Applied { remaining: 3 }
    );
}

#[tokio::test]
async fn one_active_cart_per_user() {
    let store = get_test_store().await;
    let user = UserId::new();

    let (a, b) = tokio::join!(store.get_or_create_cart(user), store.get_or_create_cart(user));
    assert_eq!(a.unwrap().id, b.unwrap().id);
}

#[tokio::test]
async fn cart_items_increment_and_reprice() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-A", 500, 10).await;
    let cart = store.get_or_create_cart(UserId::new()).await.unwrap();

    store.add_item(cart.id, &line(&product, 2)).await.unwrap();
    let mut repriced = line(&product, 1);
    repriced.price = Money::from_cents(450);
    store.add_item(cart.id, &repriced).await.unwrap();

    let loaded = store.find_active_cart(cart.user_id).await.unwrap().unwrap();
    assert_eq!(loaded.items.len(), 1);
    assert_eq!(loaded.items[0].quantity, 3);
    assert_eq!(loaded.items[0].price.cents(), 450);

    assert!(
        store
            .set_item_quantity(cart.id, product.id, 7)
            .await
            .unwrap()
    );
    assert!(
        !store
            .set_item_quantity(cart.id, ProductId::new(), 1)
            .await
            .unwrap()
    );
    assert!(store.remove_item(cart.id, product.id).await.unwrap());
    assert!(!store.remove_item(cart.id, product.id).await.unwrap());
}

#[tokio::test]
async fn create_from_cart_snapshots_and_closes_cart() {
    let store = get_test_store().await;
    let a = seed_product(&store, "SKU-A", 500, 10).await;
    let b = seed_product(&store, "SKU-B", 300, 10).await;
    let user = UserId::new();
    let cart = store.get_or_create_cart(user).await.unwrap();
    store.add_item(cart.id, &line(&a, 2)).await.unwrap();
    store.add_item(cart.id, &line(&b, 1)).await.unwrap();

    let order = store.create_from_cart(user, None, None).await.unwrap();
    assert_eq!(order.total.cents(), 1300);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.items[0].product_name, "Product SKU-A");

    // Later price changes never touch the order.
    let reprice = NewProduct::new("SKU-A", "Product SKU-A", Money::from_cents(9999), "eur", 10).unwrap();
    store.update_product(&reprice).await.unwrap();
    let reloaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(reloaded.total.cents(), 1300);
    assert_eq!(reloaded.items[0].price.cents(), 500);

    let fresh = store.get_or_create_cart(user).await.unwrap();
    assert_ne!(fresh.id, cart.id);
    assert!(fresh.is_empty());

    assert!(matches!(
        store.add_item(cart.id, &line(&a, 1)).await,
        Err(StoreError::Domain(DomainError::CartNotActive))
    ));
}

#[tokio::test]
async fn create_from_empty_cart_rolls_back() {
    let store = get_test_store().await;
    let user = UserId::new();
    let cart = store.get_or_create_cart(user).await.unwrap();

    let err = store.create_from_cart(user, None, None).await.unwrap_err();
    assert!(matches!(err, StoreError::Domain(DomainError::EmptyCart)));

    let still_active = store.find_active_cart(user).await.unwrap().unwrap();
    assert_eq!(still_active.id, cart.id);
}

#[tokio::test]
async fn order_addresses_loaded_and_missing_ones_omitted() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-A", 500, 10).await;
    let user = UserId::new();
    store
        .create_user(user, "buyer@example.com", Role::User)
        .await
        .unwrap();

    let address = Address {
        id: AddressId::new(),
        user_id: user,
        street: "1 Main St".to_string(),
        city: "Lisbon".to_string(),
        state: String::new(),
        zip_code: "1000-001".to_string(),
        country: "PT".to_string(),
        is_default: true,
    };
    store.insert_address(&address).await.unwrap();

    let cart = store.get_or_create_cart(user).await.unwrap();
    store.add_item(cart.id, &line(&product, 1)).await.unwrap();
    let order = store
        .create_from_cart(user, Some(address.id), Some(address.id))
        .await
        .unwrap();
    assert_eq!(order.shipping_address.as_ref(), Some(&address));

    assert!(store.delete_address(address.id).await.unwrap());
    let reloaded = store
        .get_order_for_user(order.id, user)
        .await
        .unwrap()
        .unwrap();
    assert!(reloaded.shipping_address.is_none());
    assert_eq!(reloaded.shipping_address_id, Some(address.id));
}

#[tokio::test]
async fn order_status_compare_and_set() {
    let store = get_test_store().await;
    let product = seed_product(&store, "SKU-A", 500, 10).await;
    let user = UserId::new();
    let cart = store.get_or_create_cart(user).await.unwrap();
    store.add_item(cart.id, &line(&product, 1)).await.unwrap();
    let order = store.create_from_cart(user, None, None).await.unwrap();

    let now = Utc::now();
    assert!(
        store
            .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Confirmed, now)
            .await
            .unwrap()
    );
    assert!(
        !store
            .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Confirmed, now)
            .await
            .unwrap()
    );

    assert!(
        store
            .get_order_for_user(order.id, UserId::new())
            .await
            .unwrap()
            .is_none()
    );
    let orders = store.list_orders_for_user(user).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn payments_single_active_per_order() {
    let store = get_test_store().await;
    let order_id = OrderId::new();
    let user = UserId::new();
    let amount = Money::from_cents(1300);

    let first = Payment::pending(order_id, user, amount, "eur", "pi_1", "pi_1_secret", Utc::now());
    store.insert_payment(&first).await.unwrap();

    let second = Payment::pending(order_id, user, amount, "eur", "pi_2", "pi_2_secret", Utc::now());
    assert!(matches!(
        store.insert_payment(&second).await,
        Err(StoreError::Conflict(_))
    ));

    assert!(
        store
            .update_payment_status(
                first.id,
                PaymentStatus::Pending,
                PaymentStatus::Cancelled,
                Utc::now()
            )
            .await
            .unwrap()
    );
    store.insert_payment(&second).await.unwrap();

    let active = store.find_active_payment(order_id).await.unwrap().unwrap();
    assert_eq!(active.id, second.id);
    let by_intent = store.find_by_intent("pi_1").await.unwrap().unwrap();
    assert_eq!(by_intent.status, PaymentStatus::Cancelled);
}

#[tokio::test]
async fn unsynced_payments_listed_until_marked() {
    let store = get_test_store().await;
    let payment = Payment::pending(
        OrderId::new(),
        UserId::new(),
        Money::from_cents(100),
        "eur",
        "pi_1",
        "pi_1_secret",
        Utc::now(),
    );
    store.insert_payment(&payment).await.unwrap();
    store
        .update_payment_status(
            payment.id,
            PaymentStatus::Pending,
            PaymentStatus::Succeeded,
            Utc::now(),
        )
        .await
        .unwrap();

    let unsynced = store.list_unsynced(10).await.unwrap();
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].id, payment.id);

    store.mark_order_synced(payment.id).await.unwrap();
    assert!(store.list_unsynced(10).await.unwrap().is_empty());
}

async fn succeeded_payment(store: &PostgresStore, intent: &str) -> Payment {
    let payment = Payment::pending(
        OrderId::new(),
        UserId::new(),
        Money::from_cents(100),
        "eur",
        intent,
        format!("{intent}_secret"),
        Utc::now(),
    );
    store.insert_payment(&payment).await.unwrap();
    store
        .update_payment_status(
            payment.id,
            PaymentStatus::Pending,
            PaymentStatus::Succeeded,
            Utc::now(),
        )
        .await
        .unwrap();
    payment
}

#[tokio::test]
async fn sync_failures_reorder_and_block_unsynced_payments() {
    let store = get_test_store().await;
    let refused = succeeded_payment(&store, "pi_refused").await;
    let retried = succeeded_payment(&store, "pi_retried").await;
    let fresh = succeeded_payment(&store, "pi_fresh").await;

    store
        .record_sync_failure(refused.id, true, Utc::now())
        .await
        .unwrap();
    store
        .record_sync_failure(retried.id, false, Utc::now())
        .await
        .unwrap();

    let unsynced = store.list_unsynced(10).await.unwrap();
    let ids: Vec<_> = unsynced.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![fresh.id, retried.id]);
    assert!(unsynced[1].last_sync_attempt_at.is_some());

    let blocked = store.find_by_intent("pi_refused").await.unwrap().unwrap();
    assert!(blocked.sync_blocked);

    // A later retryable failure does not unblock.
    store
        .record_sync_failure(refused.id, false, Utc::now())
        .await
        .unwrap();
    let blocked = store.find_by_intent("pi_refused").await.unwrap().unwrap();
    assert!(blocked.sync_blocked);

    assert!(matches!(
        store
            .record_sync_failure(PaymentId::new(), false, Utc::now())
            .await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn token_version_bump() {
    let store = get_test_store().await;
    let user = UserId::new();
    store
        .create_user(user, "someone@example.com", Role::Admin)
        .await
        .unwrap();

    assert_eq!(store.token_version(user).await.unwrap(), Some(1));
    assert_eq!(store.bump_token_version(user).await.unwrap(), 2);
    assert_eq!(store.token_version(UserId::new()).await.unwrap(), None);
    assert!(matches!(
        store
            .create_user(UserId::new(), "someone@example.com", Role::User)
            .await,
        Err(StoreError::Conflict(_))
    ));
}
