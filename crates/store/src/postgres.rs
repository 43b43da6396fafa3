use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, CartId, Money, OrderId, PaymentId, ProductId, UserId};
use domain::{
    Address, Cart, CartItem, DomainError, NewProduct, Order, OrderItem, OrderStatus, Payment,
    PaymentStatus, Product, ProductStatus, Role, StockCheck,
};
use sqlx::{PgExecutor, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::store::{
    AddressStore, CartStore, OrderStore, PaymentStore, StockLedger, StockReduction, UserStore,
};
use crate::{Result, StoreError};

const PRODUCT_COLUMNS: &str =
    "id, sku, name, price_cents, currency, stock_qty, status, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, user_id, cart_id, status, total_cents, shipping_address_id, billing_address_id, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, order_id, user_id, amount_cents, currency, status, provider_intent_id, client_secret, order_synced, sync_blocked, last_sync_attempt_at, created_at, updated_at";

/// PostgreSQL-backed implementation of every store trait.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn load_order_details(&self, mut orders: Vec<Order>) -> Result<Vec<Order>> {
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity, price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?);
            let item = OrderItem {
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                product_name: row.try_get("product_name")?,
                quantity: to_quantity(row.try_get("quantity")?)?,
                price: Money::from_cents(row.try_get("price_cents")?),
            };
            if let Some(order) = orders.iter_mut().find(|o| o.id == order_id) {
                order.items.push(item);
            }
        }

        let address_ids: Vec<AddressId> = orders
            .iter()
            .flat_map(|o| [o.shipping_address_id, o.billing_address_id])
            .flatten()
            .collect();
        if !address_ids.is_empty() {
            let addresses = self.get_addresses(&address_ids).await?;
            for order in &mut orders {
                order.attach_addresses(&addresses);
            }
        }

        Ok(orders)
    }
}

fn to_quantity(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidData(format!("quantity {value}")))
}

fn constraint_of(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    let status: String = row.try_get("status")?;
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        currency: row.try_get("currency")?,
        stock_qty: row.try_get("stock_qty")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart(row: &PgRow) -> Result<Cart> {
    let status: String = row.try_get("status")?;
    Ok(Cart {
        id: CartId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        status: status.parse()?,
        items: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        cart_id: CartId::from_uuid(row.try_get::<Uuid, _>("cart_id")?),
        status: status.parse()?,
        total: Money::from_cents(row.try_get("total_cents")?),
        shipping_address_id: row
            .try_get::<Option<Uuid>, _>("shipping_address_id")?
            .map(AddressId::from_uuid),
        billing_address_id: row
            .try_get::<Option<Uuid>, _>("billing_address_id")?
            .map(AddressId::from_uuid),
        items: Vec::new(),
        shipping_address: None,
        billing_address: None,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_payment(row: &PgRow) -> Result<Payment> {
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        amount: Money::from_cents(row.try_get("amount_cents")?),
        currency: row.try_get("currency")?,
        status: status.parse()?,
        provider_intent_id: row.try_get("provider_intent_id")?,
        client_secret: row.try_get("client_secret")?,
        order_synced: row.try_get("order_synced")?,
        sync_blocked: row.try_get("sync_blocked")?,
        last_sync_attempt_at: row.try_get("last_sync_attempt_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_address(row: &PgRow) -> Result<Address> {
    Ok(Address {
        id: AddressId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        street: row.try_get("street")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        zip_code: row.try_get("zip_code")?,
        country: row.try_get("country")?,
        is_default: row.try_get("is_default")?,
    })
}

async fn load_cart_items<'e, E>(executor: E, cart_id: CartId) -> Result<Vec<CartItem>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        SELECT product_id, product_name, quantity, price_cents
        FROM cart_items
        WHERE cart_id = $1
        ORDER BY created_at ASC, product_id ASC
        "#,
    )
    .bind(cart_id.as_uuid())
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(CartItem {
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                product_name: row.try_get("product_name")?,
                quantity: to_quantity(row.try_get("quantity")?)?,
                price: Money::from_cents(row.try_get("price_cents")?),
            })
        })
        .collect()
}

#[async_trait]
impl StockLedger for PostgresStore {
    async fn create_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, price_cents, currency, stock_qty, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(&product.currency)
        .bind(product.stock_qty)
        .bind(product.status.as_str())
        .bind(product.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match constraint_of(&e) {
            Some("unique_product_sku") => StoreError::conflict(
                "unique_product_sku",
                format!("product with sku {} already exists", product.sku),
            ),
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1"
        ))
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at ASC, sku ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_product).collect()
    }

    #[tracing::instrument(skip(self, update), fields(sku = %update.sku))]
    async fn update_product(&self, update: &NewProduct) -> Result<Product> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET name = $2, price_cents = $3, currency = $4, stock_qty = $5, updated_at = NOW()
            WHERE sku = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(&update.sku)
        .bind(&update.name)
        .bind(update.price.cents())
        .bind(&update.currency)
        .bind(update.stock_qty)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_product(&row),
            None => Err(StoreError::not_found("Product", &update.sku)),
        }
    }

    async fn set_product_status(
        &self,
        product_id: ProductId,
        status: ProductStatus,
    ) -> Result<Product> {
        let row = sqlx::query(&format!(
            "UPDATE products SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(product_id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_product(&row),
            None => Err(StoreError::not_found("Product", product_id)),
        }
    }

    async fn check_availability(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<StockCheck> {
        self.get_product(product_id)
            .await?
            .map(|p| p.check(quantity))
            .ok_or_else(|| StoreError::not_found("Product", product_id))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn reduce_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_key: Option<OrderId>,
    ) -> Result<StockReduction> {
        let mut tx = self.pool.begin().await?;

        // A concurrent holder of the same key blocks here until it commits
        // or rolls back.
        if let Some(order_id) = order_key {
            let inserted = sqlx::query(
                r#"
                INSERT INTO stock_reductions (order_id, product_id, quantity)
                VALUES ($1, $2, $3)
                ON CONFLICT (order_id, product_id) DO NOTHING
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(product_id.as_uuid())
            .bind(i64::from(quantity))
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted == 0 {
                tracing::debug!("reduction already recorded for this order");
                return Ok(StockReduction::AlreadyApplied);
            }
        }

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_qty = stock_qty - $1, updated_at = NOW()
            WHERE id = $2 AND stock_qty >= $1
            RETURNING stock_qty
            "#,
        )
        .bind(i64::from(quantity))
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        match remaining {
            Some(remaining) => {
                tx.commit().await?;
                Ok(StockReduction::Applied { remaining })
            }
            None => {
                let available: Option<i64> =
                    sqlx::query_scalar("SELECT stock_qty FROM products WHERE id = $1")
                        .bind(product_id.as_uuid())
                        .fetch_optional(&mut *tx)
                        .await?;
                match available {
                    Some(available) => Err(StoreError::insufficient_stock(product_id, quantity, available)),
                    None => Err(StoreError::not_found("Product", product_id)),
                }
            }
        }
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn find_active_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, created_at, updated_at
            FROM carts
            WHERE user_id = $1 AND status = 'active'
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut cart = row_to_cart(&row)?;
        cart.items = load_cart_items(&self.pool, cart.id).await?;
        Ok(Some(cart))
    }

    async fn create_cart(&self, cart: &Cart) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (id, user_id, status, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(cart.id.as_uuid())
        .bind(cart.user_id.as_uuid())
        .bind(cart.status.as_str())
        .bind(cart.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if constraint_of(&e) == Some("unique_active_cart_per_user") {
                return StoreError::conflict(
                    "unique_active_cart_per_user",
                    format!("user {} already has an active cart", cart.user_id),
                );
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn add_item(&self, cart_id: CartId, item: &CartItem) -> Result<()> {
        if item.quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 }.into());
        }

        // Locking the cart row serializes with order creation, which flips
        // the cart to 'ordered' under the same lock.
        let affected = sqlx::query(
            r#"
            INSERT INTO cart_items (cart_id, product_id, product_name, quantity, price_cents)
            SELECT c.id, $2, $3, $4, $5
            FROM (SELECT id FROM carts WHERE id = $1 AND status = 'active' FOR UPDATE) c
            ON CONFLICT (cart_id, product_id) DO UPDATE SET
                quantity = cart_items.quantity + EXCLUDED.quantity,
                price_cents = EXCLUDED.price_cents,
                product_name = EXCLUDED.product_name
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(&item.product_name)
        .bind(i64::from(item.quantity))
        .bind(item.price.cents())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DomainError::CartNotActive.into());
        }

        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
            .bind(cart_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<bool> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 }.into());
        }

        let affected = sqlx::query(
            r#"
            UPDATE cart_items SET quantity = $3
            WHERE cart_id = $1 AND product_id = $2
              AND EXISTS (SELECT 1 FROM carts WHERE id = $1 AND status = 'active')
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }

    async fn remove_item(&self, cart_id: CartId, product_id: ProductId) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            DELETE FROM cart_items
            WHERE cart_id = $1 AND product_id = $2
              AND EXISTS (SELECT 1 FROM carts WHERE id = $1 AND status = 'active')
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(product_id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }

    async fn clear_items(&self, cart_id: CartId) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM cart_items
            WHERE cart_id = $1
              AND EXISTS (SELECT 1 FROM carts WHERE id = $1 AND status = 'active')
            "#,
        )
        .bind(cart_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_from_cart(
        &self,
        user_id: UserId,
        shipping_address_id: Option<AddressId>,
        billing_address_id: Option<AddressId>,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, created_at, updated_at
            FROM carts
            WHERE user_id = $1 AND status = 'active'
            FOR UPDATE
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(DomainError::EmptyCart.into());
        };
        let mut cart = row_to_cart(&row)?;
        cart.items = load_cart_items(&mut *tx, cart.id).await?;

        let order = Order::from_cart(&cart, shipping_address_id, billing_address_id, Utc::now())?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, cart_id, status, total_cents, shipping_address_id, billing_address_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.cart_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.total.cents())
        .bind(order.shipping_address_id.map(|id| id.as_uuid()))
        .bind(order.billing_address_id.map(|id| id.as_uuid()))
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, product_name, quantity, price_cents)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(item.product_id.as_uuid())
            .bind(&item.product_name)
            .bind(i64::from(item.quantity))
            .bind(item.price.cents())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE carts SET status = 'ordered', updated_at = $2 WHERE id = $1")
            .bind(cart.id.as_uuid())
            .bind(order.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut loaded = self.load_order_details(vec![order]).await?;
        loaded
            .pop()
            .ok_or_else(|| StoreError::InvalidData("created order vanished".to_string()))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let orders = self.load_order_details(vec![row_to_order(&row)?]).await?;
        Ok(orders.into_iter().next())
    }

    async fn get_order_for_user(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2"
        ))
        .bind(order_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let orders = self.load_order_details(vec![row_to_order(&row)?]).await?;
        Ok(orders.into_iter().next())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>>>()?;
        self.load_order_details(orders).await
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(order_id.as_uuid())
        .bind(expected.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected == 1)
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, user_id, amount_cents, currency, status, provider_intent_id, client_secret, order_synced, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.user_id.as_uuid())
        .bind(payment.amount.cents())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.provider_intent_id)
        .bind(&payment.client_secret)
        .bind(payment.order_synced)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match constraint_of(&e) {
            Some("unique_active_payment_per_order") => StoreError::conflict(
                "unique_active_payment_per_order",
                format!("order {} already has an active payment", payment.order_id),
            ),
            Some("unique_provider_intent") => StoreError::conflict(
                "unique_provider_intent",
                format!("intent {} already recorded", payment.provider_intent_id),
            ),
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(payment_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn find_active_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 AND status IN ('pending', 'succeeded')"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn find_by_intent(&self, provider_intent_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_intent_id = $1"
        ))
        .bind(provider_intent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn update_payment_status(
        &self,
        payment_id: PaymentId,
        expected: PaymentStatus,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE payments SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(payment_id.as_uuid())
        .bind(expected.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    async fn mark_order_synced(&self, payment_id: PaymentId) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE payments SET order_synced = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(payment_id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::not_found("Payment", payment_id));
        }
        Ok(())
    }

    async fn record_sync_failure(
        &self,
        payment_id: PaymentId,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE payments
            SET last_sync_attempt_at = $3, sync_blocked = sync_blocked OR $2
            WHERE id = $1
            "#,
        )
        .bind(payment_id.as_uuid())
        .bind(blocked)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::not_found("Payment", payment_id));
        }
        Ok(())
    }

    async fn list_unsynced(&self, limit: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE status = 'succeeded' AND order_synced = FALSE AND sync_blocked = FALSE
            ORDER BY last_sync_attempt_at ASC NULLS FIRST, created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payment).collect()
    }
}

#[async_trait]
impl AddressStore for PostgresStore {
    async fn insert_address(&self, address: &Address) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO addresses (id, user_id, street, city, state, zip_code, country, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(address.id.as_uuid())
        .bind(address.user_id.as_uuid())
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.zip_code)
        .bind(&address.country)
        .bind(address.is_default)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_addresses(&self, ids: &[AddressId]) -> Result<Vec<Address>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, street, city, state, zip_code, country, is_default
            FROM addresses
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_address).collect()
    }

    async fn delete_address(&self, address_id: AddressId) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM addresses WHERE id = $1")
            .bind(address_id.as_uuid())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn create_user(&self, user_id: UserId, email: &str, role: Role) -> Result<()> {
        sqlx::query("INSERT INTO users (id, email, role) VALUES ($1, $2, $3)")
            .bind(user_id.as_uuid())
            .bind(email)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if constraint_of(&e) == Some("users_email_key") {
                    return StoreError::conflict(
                        "users_email_key",
                        format!("email {email} already registered"),
                    );
                }
                StoreError::Database(e)
            })?;

        Ok(())
    }

    async fn token_version(&self, user_id: UserId) -> Result<Option<i64>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT token_version FROM users WHERE id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        Ok(version)
    }

    async fn bump_token_version(&self, user_id: UserId) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET token_version = token_version + 1 WHERE id = $1 RETURNING token_version",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        version.ok_or_else(|| StoreError::not_found("User", user_id))
    }
}
