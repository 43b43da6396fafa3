//! Shared types for the commerce services.

mod money;
mod types;

pub use money::Money;
pub use types::{AddressId, CartId, OrderId, ParseIdError, PaymentId, ProductId, UserId};
