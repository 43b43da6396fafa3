//! Order record, its line items and the addresses it references.

use chrono::{DateTime, Utc};
use common::{AddressId, CartId, Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::status::OrderStatus;
use crate::cart::Cart;
use crate::error::DomainError;

/// A line item frozen at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    #[serde(rename = "priceCents")]
    pub price: Money,
}

impl OrderItem {
    pub fn line_total(&self) -> Result<Money, DomainError> {
        self.price
            .checked_mul(self.quantity)
            .ok_or(DomainError::AmountOverflow)
    }
}

/// A stored postal address owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub is_default: bool,
}

/// An order created from a cart.
///
/// Items and `total` never change after creation; only `status` moves.
/// The address details are filled in on read and stay `None` when the
/// referenced address no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub cart_id: CartId,
    pub status: OrderStatus,
    #[serde(rename = "totalCents")]
    pub total: Money,
    pub shipping_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    pub items: Vec<OrderItem>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub shipping_address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub billing_address: Option<Address>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Snapshots an active, non-empty cart into a pending order.
    pub fn from_cart(
        cart: &Cart,
        shipping_address_id: Option<AddressId>,
        billing_address_id: Option<AddressId>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !cart.is_active() {
            return Err(DomainError::CartNotActive);
        }
        if cart.is_empty() {
            return Err(DomainError::EmptyCart);
        }

        let items: Vec<OrderItem> = cart
            .items
            .iter()
            .map(|i| OrderItem {
                product_id: i.product_id,
                product_name: i.product_name.clone(),
                quantity: i.quantity,
                price: i.price,
            })
            .collect();
        let total = Money::checked_total(items.iter().map(|i| (i.price, i.quantity)))
            .ok_or(DomainError::AmountOverflow)?;

        Ok(Self {
            id: OrderId::new(),
            user_id: cart.user_id,
            cart_id: cart.id,
            status: OrderStatus::Pending,
            total,
            shipping_address_id,
            billing_address_id,
            items,
            shipping_address: None,
            billing_address: None,
            created_at: now,
            updated_at: None,
        })
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Attaches whichever referenced addresses were found.
    pub fn attach_addresses(&mut self, addresses: &[Address]) {
        let find = |id: Option<AddressId>| {
            id.and_then(|id| addresses.iter().find(|a| a.id == id).cloned())
        };
        self.shipping_address = find(self.shipping_address_id);
        self.billing_address = find(self.billing_address_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{CartItem, CartStatus};

    fn cart_with(lines: &[(u32, i64)]) -> Cart {
        let mut cart = Cart::new(UserId::new(), Utc::now());
        for (qty, cents) in lines {
            cart.add_item(CartItem {
                product_id: ProductId::new(),
                product_name: format!("item-{cents}"),
                quantity: *qty,
                price: Money::from_cents(*cents),
            })
            .unwrap();
        }
        cart
    }

    fn address(user_id: UserId) -> Address {
        Address {
            id: AddressId::new(),
            user_id,
            street: "1 Main St".to_string(),
            city: "Lisbon".to_string(),
            state: "Lisboa".to_string(),
            zip_code: "1000-001".to_string(),
            country: "PT".to_string(),
            is_default: true,
        }
    }

    #[test]
    fn test_from_cart_snapshots_prices_and_total() {
        let cart = cart_with(&[(2, 500), (1, 300)]);
        let order = Order::from_cart(&cart, None, None, Utc::now()).unwrap();

        assert_eq!(order.total.cents(), 1300);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.cart_id, cart.id);
        assert_eq!(order.user_id, cart.user_id);
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].price.cents(), 500);
        assert_eq!(order.items[0].product_name, "item-500");
    }

    #[test]
    fn test_from_cart_total_survives_cart_repricing() {
        let mut cart = cart_with(&[(2, 500)]);
        let order = Order::from_cart(&cart, None, None, Utc::now()).unwrap();
        cart.items[0].price = Money::from_cents(900);
        assert_eq!(order.total.cents(), 1000);
    }

    #[test]
    fn test_from_empty_cart_fails() {
        let cart = cart_with(&[]);
        assert_eq!(
            Order::from_cart(&cart, None, None, Utc::now()),
            Err(DomainError::EmptyCart)
        );
    }

    #[test]
    fn test_from_cart_with_overflowing_total_fails() {
        let huge = i64::MAX / 2 + 1;
        let mut cart = cart_with(&[(1, huge)]);
        // Concurrent increments in storage can leave a line past the limit.
        cart.items[0].quantity = 2;
        assert_eq!(
            Order::from_cart(&cart, None, None, Utc::now()),
            Err(DomainError::AmountOverflow)
        );
    }

    #[test]
    fn test_from_ordered_cart_fails() {
        let mut cart = cart_with(&[(1, 100)]);
        cart.status = CartStatus::Ordered;
        assert_eq!(
            Order::from_cart(&cart, None, None, Utc::now()),
            Err(DomainError::CartNotActive)
        );
    }

    #[test]
    fn test_attach_addresses_omits_missing() {
        let cart = cart_with(&[(1, 100)]);
        let shipping = address(cart.user_id);
        let mut order = Order::from_cart(
            &cart,
            Some(shipping.id),
            Some(AddressId::new()),
            Utc::now(),
        )
        .unwrap();

        order.attach_addresses(std::slice::from_ref(&shipping));
        assert_eq!(order.shipping_address, Some(shipping));
        assert!(order.billing_address.is_none());
    }

    #[test]
    fn test_serializes_wire_names() {
        let cart = cart_with(&[(2, 500), (1, 300)]);
        let order = Order::from_cart(&cart, None, None, Utc::now()).unwrap();
        let json = serde_json::to_value(&order).unwrap();

        assert_eq!(json["totalCents"], 1300);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["items"][0]["priceCents"], 500);
        assert!(json.get("shippingAddress").is_none());
    }
}
