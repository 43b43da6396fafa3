//! Stock coordination across the product service boundary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{OrderId, ProductId};
use domain::{Order, StockCheck};
use futures_util::future::try_join_all;

use crate::error::{Result, SagaError};
use crate::services::ProductClient;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

/// Checks and reduces stock through a [`ProductClient`].
///
/// Checks are advisory: they run before a cart mutation or an order is
/// committed, and the authoritative decrement happens later on
/// confirmation. Only checks are retried; reductions go out once and rely
/// on the ledger's per-order key for safe replays.
#[derive(Clone)]
pub struct StockCoordinator {
    products: Arc<dyn ProductClient>,
    retries: u32,
    backoff: Duration,
}

impl StockCoordinator {
    /// Creates a coordinator that retries a transient check failure up to
    /// `retries` more times.
    pub fn new(products: Arc<dyn ProductClient>, retries: u32) -> Self {
        Self {
            products,
            retries,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Overrides the base delay between check retries. It doubles per attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn products(&self) -> &Arc<dyn ProductClient> {
        &self.products
    }

    /// Verifies every `(product, quantity)` pair is available.
    ///
    /// All checks run concurrently. The first unavailable line aborts the
    /// whole operation with its requested/available pair; nothing is
    /// mutated either way.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn ensure_available(&self, lines: &[(ProductId, u32)]) -> Result<()> {
        let start = Instant::now();
        let checks = try_join_all(
            lines
                .iter()
                .map(|&(product_id, quantity)| self.check_with_retry(product_id, quantity)),
        )
        .await;
        metrics::histogram!("stock_check_duration_seconds").record(start.elapsed().as_secs_f64());

        for check in checks? {
            if !check.available {
                metrics::counter!("stock_conflicts_total").increment(1);
                tracing::warn!(
                    product_id = %check.product_id,
                    requested = check.requested_qty,
                    available = check.available_qty,
                    "insufficient stock"
                );
                return Err(SagaError::InsufficientStock {
                    product_id: check.product_id,
                    requested: check.requested_qty,
                    available: check.available_qty,
                });
            }
        }
        Ok(())
    }

    async fn check_with_retry(&self, product_id: ProductId, quantity: u32) -> Result<StockCheck> {
        let mut attempt = 0;
        loop {
            match self.products.check_stock(product_id, quantity).await {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    let delay = self.backoff * 2u32.pow(attempt);
                    attempt += 1;
                    tracing::debug!(%product_id, attempt, error = %e, "retrying stock check");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Takes the stock for every line of `order`, keyed by the order id.
    ///
    /// Lines are reduced one after another and the first failure stops
    /// the run. Lines already taken stay taken; a later retry of the same
    /// order skips them thanks to the key.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn reduce_for_order(&self, order: &Order) -> Result<()> {
        let key: OrderId = order.id;
        for item in &order.items {
            match self
                .products
                .reduce_stock(item.product_id, item.quantity, Some(key))
                .await
            {
                Ok(()) => {
                    metrics::counter!("stock_reductions_total").increment(1);
                }
                Err(e) => {
                    if matches!(e, SagaError::InsufficientStock { .. }) {
                        metrics::counter!("stock_conflicts_total").increment(1);
                        tracing::warn!(product_id = %item.product_id, error = %e, "stock reduction rejected");
                    } else {
                        tracing::error!(product_id = %item.product_id, error = %e, "stock reduction failed");
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
