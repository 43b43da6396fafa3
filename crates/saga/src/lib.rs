//! Cross-service coordination for the commerce workflow.
//!
//! The flow is a saga without compensation: cart → order → payment intent
//! → provider webhook → order confirmation → stock reduction. Each step is
//! a local atomic operation plus a trigger for the next one, and every
//! mutation entry point is idempotent so replays and partial failures
//! degrade to "retry it":
//! - [`StockCoordinator`] checks stock before cart and order commits and
//!   takes it, keyed by order, on confirmation
//! - [`OrderLifecycle`] owns the order state machine
//! - [`PaymentReconciler`] turns provider events into payment and order
//!   status, and [`ReconciliationSweep`] repairs confirmations that never
//!   landed

pub mod cart;
pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod services;
pub mod sweep;
pub mod webhook;

pub use cart::CartService;
pub use coordinator::StockCoordinator;
pub use error::{Result, SagaError};
pub use lifecycle::{Actor, OrderLifecycle};
pub use reconciler::{PaymentReconciler, WebhookOutcome};
pub use services::{
    HttpOrderClient, HttpProductClient, INTERNAL_SECRET_HEADER, InMemoryPaymentProvider,
    IntentRequest, LocalOrderClient, LocalProductClient, OrderClient, PaymentProvider,
    ProductClient, ProviderIntent, StripeProvider,
};
pub use sweep::ReconciliationSweep;
pub use webhook::{SignatureError, sign_payload, verify_signature};
