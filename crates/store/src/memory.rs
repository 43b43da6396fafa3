use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, CartId, OrderId, PaymentId, ProductId, UserId};
use domain::{
    Address, Cart, CartItem, CartStatus, DomainError, NewProduct, Order, OrderStatus, Payment,
    PaymentStatus, Product, ProductStatus, Role, StockCheck,
};
use tokio::sync::RwLock;

use crate::store::{
    AddressStore, CartStore, OrderStore, PaymentStore, StockLedger, StockReduction, UserStore,
};
use crate::{Result, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    reductions: HashSet<(OrderId, ProductId)>,
    carts: HashMap<CartId, Cart>,
    orders: Vec<Order>,
    payments: Vec<Payment>,
    addresses: HashMap<AddressId, Address>,
    users: HashMap<UserId, (String, Role, i64)>,
}

/// In-memory store implementation for testing.
///
/// One instance implements every store trait over shared state, so the
/// cart-to-order handoff stays atomic under a single write lock, the same
/// way the PostgreSQL implementation uses one transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current stock of a product, if it exists.
    pub async fn stock_of(&self, product_id: ProductId) -> Option<i64> {
        self.state
            .read()
            .await
            .products
            .get(&product_id)
            .map(|p| p.stock_qty)
    }

    /// Returns the number of recorded keyed reductions.
    pub async fn reduction_count(&self) -> usize {
        self.state.read().await.reductions.len()
    }

    /// Returns the number of stored payments.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Clears all state.
    pub async fn clear(&self) {
        *self.state.write().await = MemoryState::default();
    }
}

#[async_trait]
impl StockLedger for InMemoryStore {
    async fn create_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.write().await;
        if state.products.values().any(|p| p.sku == product.sku) {
            return Err(StoreError::conflict(
                "unique_product_sku",
                format!("product with sku {} already exists", product.sku),
            ));
        }
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&product_id).cloned())
    }

    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.values().find(|p| p.sku == sku).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| (a.created_at, &a.sku).cmp(&(b.created_at, &b.sku)));
        Ok(products)
    }

    #[tracing::instrument(skip(self, update), fields(sku = %update.sku))]
    async fn update_product(&self, update: &NewProduct) -> Result<Product> {
        let mut state = self.state.write().await;
        let product = state
            .products
            .values_mut()
            .find(|p| p.sku == update.sku)
            .ok_or_else(|| StoreError::not_found("Product", &update.sku))?;
        update.clone().apply_to(product, Utc::now());
        Ok(product.clone())
    }

    async fn set_product_status(
        &self,
        product_id: ProductId,
        status: ProductStatus,
    ) -> Result<Product> {
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;
        product.status = status;
        product.updated_at = Some(Utc::now());
        Ok(product.clone())
    }

    async fn check_availability(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<StockCheck> {
        let state = self.state.read().await;
        state
            .products
            .get(&product_id)
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
        let mut state = self.state.write().await;

        if let Some(order_id) = order_key
            && state.reductions.contains(&(order_id, product_id))
        {
            return Ok(StockReduction::AlreadyApplied);
        }

        let product = state
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;

        if product.stock_qty < i64::from(quantity) {
            return Err(StoreError::insufficient_stock(
                product_id,
                quantity,
                product.stock_qty,
            ));
        }
        product.stock_qty -= i64::from(quantity);
        product.updated_at = Some(Utc::now());
        let remaining = product.stock_qty;

        if let Some(order_id) = order_key {
            state.reductions.insert((order_id, product_id));
        }
        Ok(StockReduction::Applied { remaining })
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn find_active_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let state = self.state.read().await;
        Ok(state
            .carts
            .values()
            .find(|c| c.user_id == user_id && c.is_active())
            .cloned())
    }

    async fn create_cart(&self, cart: &Cart) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .carts
            .values()
            .any(|c| c.user_id == cart.user_id && c.is_active())
        {
            return Err(StoreError::conflict(
                "unique_active_cart_per_user",
                format!("user {} already has an active cart", cart.user_id),
            ));
        }
        state.carts.insert(cart.id, cart.clone());
        Ok(())
    }

    async fn add_item(&self, cart_id: CartId, item: &CartItem) -> Result<()> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| StoreError::not_found("Cart", cart_id))?;
        cart.add_item(item.clone())?;
        cart.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| StoreError::not_found("Cart", cart_id))?;
        match cart.set_quantity(product_id, quantity) {
            Ok(()) => Ok(true),
            Err(DomainError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_item(&self, cart_id: CartId, product_id: ProductId) -> Result<bool> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| StoreError::not_found("Cart", cart_id))?;
        match cart.remove_item(product_id) {
            Ok(()) => Ok(true),
            Err(DomainError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_items(&self, cart_id: CartId) -> Result<()> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| StoreError::not_found("Cart", cart_id))?;
        cart.clear()?;
        Ok(())
    }
}

fn with_addresses(mut order: Order, addresses: &HashMap<AddressId, Address>) -> Order {
    let found: Vec<Address> = [order.shipping_address_id, order.billing_address_id]
        .into_iter()
        .flatten()
        .filter_map(|id| addresses.get(&id).cloned())
        .collect();
    order.attach_addresses(&found);
    order
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_from_cart(
        &self,
        user_id: UserId,
        shipping_address_id: Option<AddressId>,
        billing_address_id: Option<AddressId>,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let cart = state
            .carts
            .values_mut()
            .find(|c| c.user_id == user_id && c.is_active())
            .ok_or(DomainError::EmptyCart)?;

        let order = Order::from_cart(cart, shipping_address_id, billing_address_id, now)?;
        cart.status = CartStatus::Ordered;
        cart.updated_at = Some(now);

        state.orders.push(order.clone());
        Ok(with_addresses(order, &state.addresses))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
            .map(|o| with_addresses(o, &state.addresses)))
    }

    async fn get_order_for_user(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Option<Order>> {
        Ok(self
            .get_order(order_id)
            .await?
            .filter(|o| o.is_owned_by(user_id)))
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .map(|o| with_addresses(o, &state.addresses))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.status == expected)
        {
            Some(order) => {
                order.status = to;
                order.updated_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .payments
            .iter()
            .any(|p| p.order_id == payment.order_id && p.status.blocks_new_intent())
        {
            return Err(StoreError::conflict(
                "unique_active_payment_per_order",
                format!("order {} already has an active payment", payment.order_id),
            ));
        }
        if state
            .payments
            .iter()
            .any(|p| p.provider_intent_id == payment.provider_intent_id)
        {
            return Err(StoreError::conflict(
                "unique_provider_intent",
                format!("intent {} already recorded", payment.provider_intent_id),
            ));
        }
        state.payments.push(payment.clone());
        Ok(())
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state.payments.iter().find(|p| p.id == payment_id).cloned())
    }

    async fn find_active_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.order_id == order_id && p.status.blocks_new_intent())
            .cloned())
    }

    async fn find_by_intent(&self, provider_intent_id: &str) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.provider_intent_id == provider_intent_id)
            .cloned())
    }

    async fn update_payment_status(
        &self,
        payment_id: PaymentId,
        expected: PaymentStatus,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id && p.status == expected)
        {
            Some(payment) => {
                payment.status = to;
                payment.updated_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_order_synced(&self, payment_id: PaymentId) -> Result<()> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| StoreError::not_found("Payment", payment_id))?;
        payment.order_synced = true;
        Ok(())
    }

    async fn record_sync_failure(
        &self,
        payment_id: PaymentId,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| StoreError::not_found("Payment", payment_id))?;
        payment.last_sync_attempt_at = Some(now);
        payment.sync_blocked |= blocked;
        Ok(())
    }

    async fn list_unsynced(&self, limit: i64) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut pending: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| {
                p.status == PaymentStatus::Succeeded && !p.order_synced && !p.sync_blocked
            })
            .cloned()
            .collect();
        // Never-attempted first (None sorts low), then the stalest attempt.
        pending.sort_by_key(|p| (p.last_sync_attempt_at, p.created_at));
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }
}

#[async_trait]
impl AddressStore for InMemoryStore {
    async fn insert_address(&self, address: &Address) -> Result<()> {
        let mut state = self.state.write().await;
        state.addresses.insert(address.id, address.clone());
        Ok(())
    }

    async fn get_addresses(&self, ids: &[AddressId]) -> Result<Vec<Address>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.addresses.get(id).cloned())
            .collect())
    }

    async fn delete_address(&self, address_id: AddressId) -> Result<bool> {
        Ok(self
            .state
            .write()
            .await
            .addresses
            .remove(&address_id)
            .is_some())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user(&self, user_id: UserId, email: &str, role: Role) -> Result<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|(e, _, _)| e == email) {
            return Err(StoreError::conflict(
                "users_email_key",
                format!("email {email} already registered"),
            ));
        }
        state.users.insert(user_id, (email.to_string(), role, 1));
        Ok(())
    }

    async fn token_version(&self, user_id: UserId) -> Result<Option<i64>> {
        let state = self.state.read().await;
        Ok(state.users.get(&user_id).map(|(_, _, v)| *v))
    }

    async fn bump_token_version(&self, user_id: UserId) -> Result<i64> {
        let mut state = self.state.write().await;
        let (_, _, version) = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::not_found("User", user_id))?;
        *version += 1;
        Ok(*version)
    }
}
