//! Order service client for the payment service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{Order, OrderStatus};
use reqwest::Client;
use serde::Serialize;
use store::{AddressStore, CartStore, OrderStore};

use super::{INTERNAL_SECRET_HEADER, error_from_response, http_client, join_url, transport_error};
use crate::error::{Result, SagaError};
use crate::lifecycle::{Actor, OrderLifecycle};

const SERVICE: &str = "order";

/// The internal, secret-gated order endpoints.
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Unscoped read; ownership is checked by the caller.
    async fn get_order(&self, order_id: OrderId) -> Result<Order>;

    /// Drives the order to `status`. Idempotent when the order is
    /// already there.
    async fn set_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order>;
}

#[derive(Serialize)]
struct StatusRequest {
    status: OrderStatus,
}

/// Talks to the order service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOrderClient {
    client: Client,
    base_url: String,
    internal_secret: String,
}

impl HttpOrderClient {
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
impl OrderClient for HttpOrderClient {
    #[tracing::instrument(skip(self))]
    async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        let url = join_url(&self.base_url, &format!("/internal/orders/{order_id}"));
        let response = self
            .client
            .get(url)
            .header(INTERNAL_SECRET_HEADER, &self.internal_secret)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        response.json().await.map_err(|e| transport_error(SERVICE, e))
    }

    #[tracing::instrument(skip(self))]
    async fn set_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        let url = join_url(
            &self.base_url,
            &format!("/internal/orders/{order_id}/status"),
        );
        let response = self
            .client
            .patch(url)
            .header(INTERNAL_SECRET_HEADER, &self.internal_secret)
            .json(&StatusRequest { status })
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        response.json().await.map_err(|e| transport_error(SERVICE, e))
    }
}

/// Calls the order lifecycle in-process as an internal caller.
pub struct LocalOrderClient<S> {
    lifecycle: Arc<OrderLifecycle<S>>,
    unreachable: AtomicBool,
}

impl<S> LocalOrderClient<S> {
    pub fn new(lifecycle: Arc<OrderLifecycle<S>>) -> Self {
        Self {
            lifecycle,
            unreachable: AtomicBool::new(false),
        }
    }

    /// Makes every call fail as if the order service were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
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
impl<S> OrderClient for LocalOrderClient<S>
where
    S: OrderStore + AddressStore + CartStore + 'static,
{
    async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.ensure_reachable()?;
        self.lifecycle.get_order_internal(order_id).await
    }

    async fn set_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        self.ensure_reachable()?;
        self.lifecycle
            .update_status(order_id, status, Actor::Internal)
            .await
    }
}
