//! Saga error types.

use common::{PaymentId, ProductId};
use domain::DomainError;
use store::StoreError;
use thiserror::Error;

use crate::webhook::SignatureError;

/// Errors that can occur while coordinating carts, orders and payments.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A product cannot cover the requested quantity.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: i64,
    },

    /// The order already has a pending or succeeded payment.
    #[error("Payment already exists for this order")]
    PaymentExists {
        payment_id: PaymentId,
        client_secret: String,
        provider_intent_id: String,
    },

    /// Malformed or semantically invalid input.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The referenced resource does not exist (or is not visible to the caller).
    #[error("{0}")]
    NotFound(String),

    /// The caller is authenticated but not allowed to do this.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The request conflicts with the current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The webhook payload could not be authenticated.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// A peer service or the payment provider failed.
    #[error("{service} service error: {message}")]
    Downstream {
        service: &'static str,
        message: String,
    },

    /// A peer service did not answer in time.
    #[error("{0} service timed out")]
    Timeout(&'static str),

    /// Domain error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl SagaError {
    /// Transport-level failures that are safe to retry for idempotent reads.
    pub fn is_transient(&self) -> bool {
        matches!(self, SagaError::Downstream { .. } | SagaError::Timeout(_))
    }
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => SagaError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            StoreError::NotFound { .. } => SagaError::NotFound(err.to_string()),
            StoreError::Conflict(msg) => SagaError::Conflict(msg),
            StoreError::Domain(e) => SagaError::Domain(e),
            other => SagaError::Store(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
