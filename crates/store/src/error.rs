use common::ProductId;
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional decrement matched no row: the product does not
    /// have enough stock. Nothing was changed.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: i64,
    },

    /// The referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness guard rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value could not be turned back into a domain value.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A domain invariant rejected the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// A unique guard named `guard` refused the write.
    pub(crate) fn conflict(guard: &'static str, message: impl Into<String>) -> Self {
        metrics::counter!("store_conflicts_total", "guard" => guard).increment(1);
        tracing::debug!(guard, "unique guard rejected write");
        Self::Conflict(message.into())
    }

    pub(crate) fn insufficient_stock(product_id: ProductId, requested: u32, available: i64) -> Self {
        metrics::counter!("store_insufficient_stock_total").increment(1);
        tracing::warn!(%product_id, requested, available, "stock reduction refused");
        Self::InsufficientStock {
            product_id,
            requested,
            available,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
