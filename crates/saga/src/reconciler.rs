//! Payment intents and provider webhook reconciliation.

use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, PaymentId, UserId};
use domain::{OrderStatus, Payment, PaymentStatus, Transition};
use store::{PaymentStore, StoreError};

use crate::error::{Result, SagaError};
use crate::services::{IntentRequest, OrderClient, PaymentProvider};
use crate::webhook::{WebhookEventKind, parse_event, verify_signature};

/// What a webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The payment moved to a new status.
    Applied,
    /// The payment already had this status; nothing changed locally.
    Replayed,
    /// Unhandled event type, or an event that arrived after the payment
    /// settled differently.
    Ignored,
}

/// Whether the order service answered the confirm push with a refusal
/// that no retry can change. Transport failures, store errors and stock
/// shortfalls (stock may be replenished) stay retryable.
fn refuses_confirmation(err: &SagaError) -> bool {
    matches!(
        err,
        SagaError::Conflict(_)
            | SagaError::NotFound(_)
            | SagaError::Forbidden(_)
            | SagaError::InvalidRequest(_)
            | SagaError::Domain(_)
    )
}

/// The payment service.
pub struct PaymentReconciler<S> {
    store: S,
    orders: Arc<dyn OrderClient>,
    provider: Arc<dyn PaymentProvider>,
    webhook_secret: String,
    currency: String,
}

impl<S: PaymentStore> PaymentReconciler<S> {
    pub fn new(
        store: S,
        orders: Arc<dyn OrderClient>,
        provider: Arc<dyn PaymentProvider>,
        webhook_secret: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            orders,
            provider,
            webhook_secret: webhook_secret.into(),
            currency: currency.into(),
        }
    }

    /// Opens a payment for a pending order owned by `user_id`.
    ///
    /// If the order already has a pending or succeeded payment, that
    /// payment is reported back through `PaymentExists` instead of a
    /// second intent being created.
    #[tracing::instrument(skip(self))]
    pub async fn create_intent(&self, order_id: OrderId, user_id: UserId) -> Result<Payment> {
        if let Some(existing) = self.store.find_active_payment(order_id).await? {
            return Err(self.existing_payment(existing, user_id));
        }

        let order = self.orders.get_order(order_id).await?;
        if !order.is_owned_by(user_id) {
            tracing::warn!(%order_id, %user_id, "payment requested for another user's order");
            return Err(SagaError::Forbidden(
                "order does not belong to the user".to_string(),
            ));
        }
        if order.status != OrderStatus::Pending {
            return Err(SagaError::Conflict(format!(
                "order is {}, only pending orders can be paid",
                order.status
            )));
        }

        let payment_id = PaymentId::new();
        let intent = self
            .provider
            .create_intent(&IntentRequest {
                amount: order.total,
                currency: self.currency.clone(),
                order_id,
                user_id,
                idempotency_key: payment_id,
            })
            .await?;

        let mut payment = Payment::pending(
            order_id,
            user_id,
            order.total,
            &self.currency,
            intent.id,
            intent.client_secret,
            Utc::now(),
        );
        payment.id = payment_id;

        match self.store.insert_payment(&payment).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                // A concurrent request for the same order won the insert.
                let winner = self
                    .store
                    .find_active_payment(order_id)
                    .await?
                    .ok_or_else(|| SagaError::Conflict("payment changed concurrently".into()))?;
                return Err(self.existing_payment(winner, user_id));
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("payment_intents_created_total").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            %order_id,
            intent_id = %payment.provider_intent_id,
            amount_cents = payment.amount.cents(),
            "payment intent created"
        );
        Ok(payment)
    }

    fn existing_payment(&self, existing: Payment, user_id: UserId) -> SagaError {
        if existing.user_id != user_id {
            return SagaError::Forbidden("order does not belong to the user".to_string());
        }
        SagaError::PaymentExists {
            payment_id: existing.id,
            client_secret: existing.client_secret,
            provider_intent_id: existing.provider_intent_id,
        }
    }

    /// Owner-only read.
    pub async fn get_payment(&self, payment_id: PaymentId, user_id: UserId) -> Result<Payment> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("Payment not found: {payment_id}")))?;
        if payment.user_id != user_id {
            tracing::warn!(%payment_id, %user_id, "payment read by another user");
            return Err(SagaError::Forbidden(
                "payment does not belong to the user".to_string(),
            ));
        }
        Ok(payment)
    }

    /// Authenticates and applies one provider delivery.
    ///
    /// Nothing in the payload is read before the signature checks out.
    #[tracing::instrument(skip(self, payload, signature), fields(bytes = payload.len()))]
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome> {
        if let Err(e) = verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            Utc::now().timestamp(),
        ) {
            tracing::warn!(error = %e, "webhook signature rejected");
            return Err(e.into());
        }

        let event = parse_event(payload)?;
        metrics::counter!("webhook_events_total", "type" => event.kind.as_str().to_string())
            .increment(1);

        let target = match &event.kind {
            WebhookEventKind::PaymentSucceeded => PaymentStatus::Succeeded,
            WebhookEventKind::PaymentFailed => PaymentStatus::Failed,
            WebhookEventKind::PaymentCanceled => PaymentStatus::Cancelled,
            WebhookEventKind::Other(event_type) => {
                tracing::debug!(event_id = %event.id, %event_type, "ignoring webhook event");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let payment = self
            .store
            .find_by_intent(&event.intent_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(intent_id = %event.intent_id, "webhook for unknown payment intent");
                SagaError::NotFound(format!("No payment for intent {}", event.intent_id))
            })?;

        let applied = match payment.status.transition_to(target) {
            Ok(Transition::Apply) => {
                self.store
                    .update_payment_status(payment.id, payment.status, target, Utc::now())
                    .await?
            }
            Ok(Transition::NoOp) => false,
            Err(_) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    current = %payment.status,
                    event = event.kind.as_str(),
                    "stale webhook event for a settled payment"
                );
                return Ok(WebhookOutcome::Ignored);
            }
        };

        if applied {
            tracing::info!(payment_id = %payment.id, status = %target, "payment status updated");
            if target == PaymentStatus::Succeeded {
                self.push_confirm(&payment).await;
            }
            return Ok(WebhookOutcome::Applied);
        }

        // Replay, or a concurrent delivery got there first.
        let current = self
            .store
            .get_payment(payment.id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("Payment not found: {}", payment.id)))?;
        if current.status != target {
            return Ok(WebhookOutcome::Ignored);
        }
        if target == PaymentStatus::Succeeded && !current.order_synced {
            self.push_confirm(&current).await;
        }
        Ok(WebhookOutcome::Replayed)
    }

    /// Asks the order service to confirm the paid order.
    ///
    /// Best effort: the payment stays succeeded whatever happens. A
    /// retryable failure leaves it for the next sweep; a refusal blocks it
    /// from further sweeps.
    async fn push_confirm(&self, payment: &Payment) -> bool {
        match self
            .orders
            .set_status(payment.order_id, OrderStatus::Confirmed)
            .await
        {
            Ok(_) => {
                if let Err(e) = self.store.mark_order_synced(payment.id).await {
                    tracing::error!(payment_id = %payment.id, error = %e, "failed to mark payment synced");
                    return false;
                }
                tracing::info!(payment_id = %payment.id, order_id = %payment.order_id, "order confirmed");
                true
            }
            Err(e) => {
                let blocked = refuses_confirmation(&e);
                metrics::counter!("order_confirm_push_failures_total").increment(1);
                if blocked {
                    metrics::counter!("order_confirm_blocked_total").increment(1);
                    tracing::error!(
                        payment_id = %payment.id,
                        order_id = %payment.order_id,
                        error = %e,
                        "order refused confirmation after successful payment, needs manual action"
                    );
                } else {
                    tracing::error!(
                        payment_id = %payment.id,
                        order_id = %payment.order_id,
                        error = %e,
                        "order confirmation failed after successful payment"
                    );
                }
                if let Err(e) = self
                    .store
                    .record_sync_failure(payment.id, blocked, Utc::now())
                    .await
                {
                    tracing::error!(payment_id = %payment.id, error = %e, "failed to record sync failure");
                }
                false
            }
        }
    }

    /// Re-pushes confirmation for succeeded payments the order service
    /// never acknowledged. Returns how many were repaired.
    #[tracing::instrument(skip(self))]
    pub async fn resync_unsynced(&self, batch: i64) -> Result<usize> {
        let pending = self.store.list_unsynced(batch).await?;
        let mut repaired = 0;
        for payment in &pending {
            if self.push_confirm(payment).await {
                repaired += 1;
            }
        }
        if repaired > 0 {
            metrics::counter!("reconciliation_repaired_total").increment(repaired as u64);
        }
        Ok(repaired)
    }
}
