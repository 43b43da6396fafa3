//! Persistence layer for the commerce services.
//!
//! Each concern gets a trait ([`StockLedger`], [`CartStore`], [`OrderStore`],
//! [`PaymentStore`], [`AddressStore`], [`UserStore`]) with two
//! implementations: [`PostgresStore`] for deployment and [`InMemoryStore`]
//! for tests. Every invariant that must hold across concurrent requests
//! (non-negative stock, one active cart per user, one live payment per
//! order) is enforced by the store, not by callers.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    AddressStore, CartStore, CartStoreExt, OrderStore, PaymentStore, StockLedger, StockReduction,
    UserStore,
};
