//! Domain layer for the commerce services.
//!
//! This crate holds the pure models and their invariants:
//! - Product stock and availability checks
//! - The user's mutable cart and its derived total
//! - The order state machine and the cart-to-order price snapshot
//! - Payment status transitions driven by provider events
//!
//! Nothing here performs I/O; persistence lives in the `store` crate and
//! cross-service coordination in the `saga` crate.

pub mod cart;
pub mod error;
pub mod order;
pub mod payment;
pub mod product;
pub mod user;

pub use cart::{Cart, CartItem, CartStatus};
pub use error::DomainError;
pub use order::{Address, Order, OrderItem, OrderStatus, Transition};
pub use payment::{Payment, PaymentStatus};
pub use product::{NewProduct, Product, ProductStatus, StockCheck};
pub use user::Role;
