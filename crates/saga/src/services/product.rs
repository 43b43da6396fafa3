//! Product service client: catalog reads and the stock ledger endpoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use domain::{Product, StockCheck};
use reqwest::Client;
use serde::Serialize;
use store::StockLedger;

use super::{INTERNAL_SECRET_HEADER, error_from_response, http_client, join_url, transport_error};
use crate::error::{Result, SagaError};

const SERVICE: &str = "product";

/// Operations the cart and order services need from the product service.
#[async_trait]
pub trait ProductClient: Send + Sync {
    /// Fetches the current catalog entry (price, name, status).
    async fn get_product(&self, product_id: ProductId) -> Result<Product>;

    /// Read-only availability check. Safe to retry.
    async fn check_stock(&self, product_id: ProductId, quantity: u32) -> Result<StockCheck>;

    /// Authoritative decrement. With `order_id` set a repeat for the same
    /// order and product is a successful no-op.
    async fn reduce_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_id: Option<OrderId>,
    ) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StockRequest {
    product_id: ProductId,
    quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_id: Option<OrderId>,
}

/// Talks to the product service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProductClient {
    client: Client,
    base_url: String,
    internal_secret: String,
}

impl HttpProductClient {
    /// `base_url` includes the API prefix, e.g. `http://product:8081/api/v1`.
    pub fn new(
        base_url: impl Into<String>,
        internal_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            internal_secret: internal_secret.into(),
        })
    }
}

#[async_trait]
impl ProductClient for HttpProductClient {
    #[tracing::instrument(skip(self))]
    async fn get_product(&self, product_id: ProductId) -> Result<Product> {
        let url = join_url(&self.base_url, &format!("/products/{product_id}"));
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        response.json().await.map_err(|e| transport_error(SERVICE, e))
    }

    #[tracing::instrument(skip(self))]
    async fn check_stock(&self, product_id: ProductId, quantity: u32) -> Result<StockCheck> {
        let url = join_url(&self.base_url, "/products/stock/check");
        let response = self
            .client
            .post(url)
            .json(&StockRequest {
                product_id,
                quantity,
                order_id: None,
            })
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        response.json().await.map_err(|e| transport_error(SERVICE, e))
    }

    #[tracing::instrument(skip(self))]
    async fn reduce_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_id: Option<OrderId>,
    ) -> Result<()> {
        let url = join_url(&self.base_url, "/internal/products/stock/reduce");
        let response = self
            .client
            .post(url)
            .header(INTERNAL_SECRET_HEADER, &self.internal_secret)
            .json(&StockRequest {
                product_id,
                quantity,
                order_id,
            })
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        Ok(())
    }
}

/// Calls the stock ledger in-process.
///
/// Used when the product service runs in the same binary, and by tests,
/// which can make it fail like an unreachable peer.
#[derive(Clone)]
pub struct LocalProductClient {
    ledger: Arc<dyn StockLedger>,
    unreachable: Arc<AtomicBool>,
    failing_checks: Arc<AtomicU32>,
    check_calls: Arc<AtomicUsize>,
}

impl LocalProductClient {
    pub fn new(ledger: Arc<dyn StockLedger>) -> Self {
        Self {
            ledger,
            unreachable: Arc::new(AtomicBool::new(false)),
            failing_checks: Arc::new(AtomicU32::new(0)),
            check_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every call fail as if the product service were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes the next `n` stock checks fail with a transient error.
    pub fn fail_next_checks(&self, n: u32) {
        self.failing_checks.store(n, Ordering::SeqCst);
    }

    /// Number of stock checks attempted, including failed ones.
    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SagaError::Downstream {
                service: SERVICE,
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProductClient for LocalProductClient {
    async fn get_product(&self, product_id: ProductId) -> Result<Product> {
        self.ensure_reachable()?;
        self.ledger
            .get_product(product_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("Product not found: {product_id}")))
    }

    async fn check_stock(&self, product_id: ProductId, quantity: u32) -> Result<StockCheck> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;
        let injected = self
            .failing_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SagaError::Timeout(SERVICE));
        }
        Ok(self.ledger.check_availability(product_id, quantity).await?)
    }

    async fn reduce_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        order_id: Option<OrderId>,
    ) -> Result<()> {
        self.ensure_reachable()?;
        self.ledger
            .reduce_stock(product_id, quantity, order_id)
            .await?;
        Ok(())
    }
}
