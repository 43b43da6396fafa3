//! Payment service endpoints and the provider webhook.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{Money, OrderId, PaymentId};
use domain::{Payment, PaymentStatus};
use saga::PaymentReconciler;
use serde::{Deserialize, Serialize};
use store::PaymentStore;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::{ValidJson, parse_id};
use crate::state::AppState;

/// Header the provider signs deliveries with.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub order_id: OrderId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub payment_id: PaymentId,
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount_cents: Money,
    pub currency: String,
    pub status: PaymentStatus,
}

impl From<Payment> for IntentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            payment_id: payment.id,
            client_secret: payment.client_secret,
            payment_intent_id: payment.provider_intent_id,
            amount_cents: payment.amount,
            currency: payment.currency,
            status: payment.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

type PaymentState<S> = State<Arc<AppState<PaymentReconciler<S>>>>;

/// POST /payment-intents
#[tracing::instrument(skip(state))]
pub async fn create_intent<S: PaymentStore + 'static>(
    State(state): PaymentState<S>,
    user: AuthUser,
    ValidJson(req): ValidJson<CreateIntentRequest>,
) -> Result<(StatusCode, Json<IntentResponse>), ApiError> {
    let payment = state
        .service
        .create_intent(req.order_id, user.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(payment.into())))
}

/// GET /payments/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: PaymentStore + 'static>(
    State(state): PaymentState<S>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let payment_id: PaymentId = parse_id(&id)?;
    Ok(Json(
        state.service.get_payment(payment_id, user.user_id).await?,
    ))
}

/// POST /webhooks/stripe: Raw body, authenticated by signature only.
#[tracing::instrument(skip(state, headers, body))]
pub async fn webhook<S: PaymentStore + 'static>(
    State(state): PaymentState<S>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing signature header".to_string()))?;

    let outcome = state.service.handle_webhook(&body, signature).await?;
    tracing::debug!(?outcome, "webhook processed");
    Ok(Json(WebhookResponse { received: true }))
}
