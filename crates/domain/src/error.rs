//! Domain error types.

use common::ProductId;
use thiserror::Error;

use crate::order::OrderStatus;
use crate::payment::PaymentStatus;

/// Errors raised when a domain invariant would be violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The order state machine does not allow this move.
    #[error("Invalid status transition: cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Payment status is monotonic; terminal states never change.
    #[error("Invalid payment transition: cannot move payment from {from} to {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// An order can only be created from a cart with items.
    #[error("Cart is empty")]
    EmptyCart,

    /// Only the active cart accepts mutations or can become an order.
    #[error("Cart is not active")]
    CartNotActive,

    /// Quantities must be at least one.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i64 },

    /// Prices must be strictly positive.
    #[error("Invalid price: {cents} (must be greater than 0)")]
    InvalidPrice { cents: i64 },

    /// A line or order total does not fit in the money type.
    #[error("Amount overflow: total exceeds the largest representable amount")]
    AmountOverflow,

    /// Stock quantities can never be negative.
    #[error("Invalid stock quantity: {quantity} (must not be negative)")]
    InvalidStock { quantity: i64 },

    /// A status string did not name a known status.
    #[error("Unknown {kind} status: {value}")]
    UnknownStatus { kind: &'static str, value: String },

    /// A required text field was blank.
    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// The cart has no line for this product.
    #[error("Item not found in cart: {0}")]
    ItemNotFound(ProductId),
}

/// Validates a wire quantity and narrows it to the domain type.
pub fn validate_quantity(quantity: i64) -> Result<u32, DomainError> {
    if quantity <= 0 {
        return Err(DomainError::InvalidQuantity { quantity });
    }
    u32::try_from(quantity).map_err(|_| DomainError::InvalidQuantity { quantity })
}
