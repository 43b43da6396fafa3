//! The user's shopping cart.

use chrono::{DateTime, Utc};
use common::{CartId, Money, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Lifecycle of a cart.
///
/// ```text
/// Active ──(order created)──► Ordered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CartStatus {
    #[default]
    Active,
    Ordered,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CartStatus::Active => "active",
            CartStatus::Ordered => "ordered",
        }
    }
}

impl std::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CartStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CartStatus::Active),
            "ordered" => Ok(CartStatus::Ordered),
            other => Err(DomainError::UnknownStatus {
                kind: "cart",
                value: other.to_string(),
            }),
        }
    }
}

/// A cart line, priced when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    #[serde(rename = "priceCents")]
    pub price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Result<Money, DomainError> {
        self.price
            .checked_mul(self.quantity)
            .ok_or(DomainError::AmountOverflow)
    }
}

/// A user's cart. Exactly one per user is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub status: CartStatus,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// Creates a fresh, empty active cart.
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: CartId::new(),
            user_id,
            status: CartStatus::Active,
            items: Vec::new(),
            created_at: now,
            updated_at: None,
        }
    }

    /// Derived total; never stored.
    pub fn total(&self) -> Result<Money, DomainError> {
        Money::checked_total(self.items.iter().map(|i| (i.price, i.quantity)))
            .ok_or(DomainError::AmountOverflow)
    }

    pub fn is_active(&self) -> bool {
        self.status == CartStatus::Active
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    /// Quantity the cart would hold for `product_id` after adding `quantity`.
    pub fn quantity_after_add(&self, product_id: ProductId, quantity: u32) -> u32 {
        self.item(product_id)
            .map_or(quantity, |i| i.quantity.saturating_add(quantity))
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DomainError::CartNotActive)
        }
    }

    /// Adds a line or increments an existing one, refreshing its price.
    ///
    /// Refused with `AmountOverflow` when the resulting total would not
    /// fit; the cart is left untouched.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), DomainError> {
        self.ensure_active()?;
        if item.quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        let mut items = self.items.clone();
        match items.iter_mut().find(|i| i.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(item.quantity);
                existing.price = item.price;
                existing.product_name = item.product_name;
            }
            None => items.push(item),
        }
        self.replace_items(items)
    }

    /// Sets the quantity of an existing line.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: u32) -> Result<(), DomainError> {
        self.ensure_active()?;
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        let mut items = self.items.clone();
        let line = items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .ok_or(DomainError::ItemNotFound(product_id))?;
        line.quantity = quantity;
        self.replace_items(items)
    }

    fn replace_items(&mut self, items: Vec<CartItem>) -> Result<(), DomainError> {
        Money::checked_total(items.iter().map(|i| (i.price, i.quantity)))
            .ok_or(DomainError::AmountOverflow)?;
        self.items = items;
        Ok(())
    }

    /// Removes a line.
    pub fn remove_item(&mut self, product_id: ProductId) -> Result<(), DomainError> {
        self.ensure_active()?;
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before {
            return Err(DomainError::ItemNotFound(product_id));
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.items.clear();
        Ok(())
    }
}
