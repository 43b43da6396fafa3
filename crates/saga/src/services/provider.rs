//! Payment provider client.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, PaymentId, UserId};
use reqwest::Client;
use serde::Deserialize;

use super::{http_client, join_url, transport_error};
use crate::error::{Result, SagaError};

const SERVICE: &str = "payment provider";

/// What the reconciler asks the provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub amount: Money,
    pub currency: String,
    pub order_id: OrderId,
    pub user_id: UserId,
    /// Sent as the provider's idempotency key so a retried create
    /// returns the same intent.
    pub idempotency_key: PaymentId,
}

/// The provider-side handle of a charge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderIntent {
    pub id: String,
    pub client_secret: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(&self, request: &IntentRequest) -> Result<ProviderIntent>;
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeError,
}

#[derive(Deserialize)]
struct StripeError {
    message: Option<String>,
}

/// Creates payment intents through the Stripe REST API.
#[derive(Debug, Clone)]
pub struct StripeProvider {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl StripeProvider {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_base: api_base.into(),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    #[tracing::instrument(skip(self), fields(order_id = %request.order_id))]
    async fn create_intent(&self, request: &IntentRequest) -> Result<ProviderIntent> {
        let amount = request.amount.cents().to_string();
        let currency = request.currency.to_lowercase();
        let order_id = request.order_id.to_string();
        let user_id = request.user_id.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("metadata[order_id]", order_id.as_str()),
            ("metadata[user_id]", user_id.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ];

        let response = self
            .client
            .post(join_url(&self.api_base, "/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", request.idempotency_key.to_string())
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| format!("unexpected status {status}"));
            tracing::error!(%status, error = %message, "payment intent creation failed");
            return Err(SagaError::Downstream {
                service: SERVICE,
                message,
            });
        }
        response.json().await.map_err(|e| transport_error(SERVICE, e))
    }
}

/// In-memory provider for tests.
#[derive(Debug, Default)]
pub struct InMemoryPaymentProvider {
    next_id: AtomicU32,
    fail_on_create: AtomicBool,
}

impl InMemoryPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the provider to reject intent creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.fail_on_create.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of intents created so far.
    pub fn intent_count(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for InMemoryPaymentProvider {
    async fn create_intent(&self, _request: &IntentRequest) -> Result<ProviderIntent> {
        if self.fail_on_create.load(Ordering::SeqCst) {
            return Err(SagaError::Downstream {
                service: SERVICE,
                message: "card declined".to_string(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("pi_{n:04}");
        Ok(ProviderIntent {
            client_secret: format!("{id}_secret_test"),
            id,
        })
    }
}
