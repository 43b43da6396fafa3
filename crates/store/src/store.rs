use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, CartId, OrderId, PaymentId, ProductId, UserId};
use domain::{
    Address, Cart, CartItem, NewProduct, Order, OrderStatus, Payment, PaymentStatus, Product,
    ProductStatus, Role, StockCheck,
};

use crate::{Result, StoreError};

/// Outcome of a successful stock reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockReduction {
    /// Stock was decremented; `remaining` is the new quantity.
    Applied { remaining: i64 },
    /// A reduction with the same order key was already recorded.
    AlreadyApplied,
}

/// Per-product stock counter with atomic, conditional decrements.
///
/// Implementations must never let `stock_qty` drop below zero, even under
/// concurrent reducers.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Inserts a new product. Fails with `Conflict` on a duplicate SKU.
    async fn create_product(&self, product: &Product) -> Result<()>;

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>>;

    /// All products, oldest first.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Replaces name, price, currency and stock of the product with
    /// `update.sku`. Status and id are kept. Lines already frozen into
    /// orders are not affected.
    async fn update_product(&self, update: &NewProduct) -> Result<Product>;

    /// Sets the product's sale status and returns the updated product.
    async fn set_product_status(
        &self,
        product_id: ProductId,
        status: ProductStatus,
    ) -> Result<Product>;

    /// Reports availability without mutating anything.
    ///
    /// Fails only with `NotFound` for unknown products.
    async fn check_availability(&self, product_id: ProductId, quantity: u32)
    -> Result<StockCheck>;

    /// Decrements stock by `quantity` if at least that much is on hand.
    ///
    /// With `order_key` set the reduction is recorded under
    /// `(order_key, product_id)` in the same unit of work, and a repeat
    /// returns `AlreadyApplied` without touching stock.
    async fn reduce_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_key: Option<OrderId>,
    ) -> Result<StockReduction>;
}

/// Storage for the user's carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the user's single active cart, if one exists.
    async fn find_active_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    /// Inserts a new active cart. Fails with `Conflict` if the user
    /// already has one.
    async fn create_cart(&self, cart: &Cart) -> Result<()>;

    /// Adds a line or increments an existing one, refreshing its price
    /// and name.
    async fn add_item(&self, cart_id: CartId, item: &CartItem) -> Result<()>;

    /// Sets the quantity of a line. Returns false when there is no line.
    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<bool>;

    /// Removes a line. Returns false when there is no line.
    async fn remove_item(&self, cart_id: CartId, product_id: ProductId) -> Result<bool>;

    async fn clear_items(&self, cart_id: CartId) -> Result<()>;
}

/// Extension methods built from the `CartStore` primitives.
#[async_trait]
pub trait CartStoreExt: CartStore {
    /// Returns the active cart, creating it lazily.
    ///
    /// A concurrent creator winning the unique guard is not an error: the
    /// winner's cart is re-read and returned.
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart> {
        if let Some(cart) = self.find_active_cart(user_id).await? {
            return Ok(cart);
        }

        let cart = Cart::new(user_id, Utc::now());
        match self.create_cart(&cart).await {
            Ok(()) => Ok(cart),
            Err(StoreError::Conflict(_)) => self
                .find_active_cart(user_id)
                .await?
                .ok_or_else(|| StoreError::not_found("Cart", user_id)),
            Err(e) => Err(e),
        }
    }
}

impl<T: CartStore + ?Sized> CartStoreExt for T {}

/// Storage for orders and their frozen line items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Turns the user's active cart into a pending order.
    ///
    /// Reading the cart, inserting the order with its items and marking
    /// the cart `ordered` happen as one atomic unit. Fails with
    /// `DomainError::EmptyCart` when there is no active cart or it has no
    /// items.
    async fn create_from_cart(
        &self,
        user_id: UserId,
        shipping_address_id: Option<AddressId>,
        billing_address_id: Option<AddressId>,
    ) -> Result<Order>;

    /// Loads an order regardless of owner.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Loads an order scoped to its owner.
    async fn get_order_for_user(&self, order_id: OrderId, user_id: UserId)
    -> Result<Option<Order>>;

    /// Lists the user's orders, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Writes `to` only if the order is still in `expected`.
    ///
    /// Returns false when another writer moved the order first.
    async fn update_order_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Storage for local payment records.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a payment. Fails with `Conflict` if the order already has a
    /// pending or succeeded payment.
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>>;

    /// Returns the order's pending or succeeded payment, if any.
    async fn find_active_payment(&self, order_id: OrderId) -> Result<Option<Payment>>;

    async fn find_by_intent(&self, provider_intent_id: &str) -> Result<Option<Payment>>;

    /// Writes `to` only if the payment is still in `expected`.
    async fn update_payment_status(
        &self,
        payment_id: PaymentId,
        expected: PaymentStatus,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Records that the order service acknowledged the confirm push.
    async fn mark_order_synced(&self, payment_id: PaymentId) -> Result<()>;

    /// Records a failed confirm push at `now`. `blocked` marks the failure
    /// as permanent, which takes the payment out of `list_unsynced`.
    async fn record_sync_failure(
        &self,
        payment_id: PaymentId,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Succeeded, unblocked payments whose confirm push never landed.
    /// Never-attempted payments come first, then the least recently tried.
    async fn list_unsynced(&self, limit: i64) -> Result<Vec<Payment>>;
}

/// Read access to stored addresses.
#[async_trait]
pub trait AddressStore: Send + Sync {
    async fn insert_address(&self, address: &Address) -> Result<()>;

    /// Loads the addresses that exist among `ids`; missing ids are skipped.
    async fn get_addresses(&self, ids: &[AddressId]) -> Result<Vec<Address>>;

    async fn delete_address(&self, address_id: AddressId) -> Result<bool>;
}

/// The slice of user data that token validation needs.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user_id: UserId, email: &str, role: Role) -> Result<()>;

    /// Returns the current token version, or `None` for unknown users.
    async fn token_version(&self, user_id: UserId) -> Result<Option<i64>>;

    /// Invalidates every token issued so far for the user.
    async fn bump_token_version(&self, user_id: UserId) -> Result<i64>;
}
