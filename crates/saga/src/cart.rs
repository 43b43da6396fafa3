//! Cart operations guarded by stock checks.

use common::{ProductId, UserId};
use domain::{Cart, CartItem, DomainError};
use store::{CartStore, CartStoreExt};

use crate::coordinator::StockCoordinator;
use crate::error::{Result, SagaError};

/// The cart service: one lazily created active cart per user.
pub struct CartService<S> {
    store: S,
    stock: StockCoordinator,
}

impl<S: CartStore> CartService<S> {
    pub fn new(store: S, stock: StockCoordinator) -> Self {
        Self { store, stock }
    }

    /// Returns the user's active cart, creating an empty one if needed.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart(&self, user_id: UserId) -> Result<Cart> {
        Ok(self.store.get_or_create_cart(user_id).await?)
    }

    /// Adds `quantity` units of a product, priced at its current price.
    ///
    /// The stock check covers the whole resulting line, not just the
    /// units being added.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 }.into());
        }
        let product = self.stock.products().get_product(product_id).await?;
        let cart = self.store.get_or_create_cart(user_id).await?;

        let line_quantity = cart.quantity_after_add(product_id, quantity);
        self.stock
            .ensure_available(&[(product_id, line_quantity)])
            .await?;

        let item = CartItem {
            product_id,
            product_name: product.name,
            quantity,
            price: product.price,
        };
        // Refuse a line whose total would overflow before writing it.
        cart.clone().add_item(item.clone())?;
        self.store.add_item(cart.id, &item).await?;
        tracing::info!(cart_id = %cart.id, %product_id, line_quantity, "cart item added");
        self.reload(user_id).await
    }

    /// Sets a line's quantity after checking the new amount is in stock.
    #[tracing::instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 }.into());
        }
        let cart = self.store.get_or_create_cart(user_id).await?;
        cart.clone().set_quantity(product_id, quantity)?;

        self.stock.ensure_available(&[(product_id, quantity)]).await?;

        if !self
            .store
            .set_item_quantity(cart.id, product_id, quantity)
            .await?
        {
            return Err(DomainError::ItemNotFound(product_id).into());
        }
        self.reload(user_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, user_id: UserId, product_id: ProductId) -> Result<Cart> {
        let cart = self.store.get_or_create_cart(user_id).await?;
        if !self.store.remove_item(cart.id, product_id).await? {
            return Err(DomainError::ItemNotFound(product_id).into());
        }
        self.reload(user_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) -> Result<Cart> {
        let cart = self.store.get_or_create_cart(user_id).await?;
        self.store.clear_items(cart.id).await?;
        self.reload(user_id).await
    }

    async fn reload(&self, user_id: UserId) -> Result<Cart> {
        self.store
            .find_active_cart(user_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("No active cart for user {user_id}")))
    }
}
