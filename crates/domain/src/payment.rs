//! Local record of a provider payment intent.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::order::Transition;

/// Payment status, driven only by provider webhook events.
///
/// ```text
/// Pending ──► Succeeded
///    ├──────► Failed
///    └──────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Pending and succeeded payments occupy the order's single payment slot.
    pub fn blocks_new_intent(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Succeeded)
    }

    /// Status only moves forward out of `Pending`; repeating the current
    /// status is a no-op.
    pub fn transition_to(&self, to: PaymentStatus) -> Result<Transition, DomainError> {
        if *self == to {
            return Ok(Transition::NoOp);
        }
        match (self, to) {
            (PaymentStatus::Pending, _) => Ok(Transition::Apply),
            _ => Err(DomainError::InvalidPaymentTransition { from: *self, to }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(DomainError::UnknownStatus {
                kind: "payment",
                value: other.to_string(),
            }),
        }
    }
}

/// A payment for one order, keyed to the provider's intent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    #[serde(rename = "amountCents")]
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(rename = "paymentIntentId")]
    pub provider_intent_id: String,
    pub client_secret: String,
    /// True once the order service acknowledged the confirm push.
    pub order_synced: bool,
    /// Set when the confirm push was refused for good, e.g. the order was
    /// cancelled before the payment landed. Such payments need manual
    /// follow-up and are left out of the reconciliation sweep.
    #[serde(default)]
    pub sync_blocked: bool,
    /// Last failed confirm push; the sweep retries the stalest first.
    #[serde(default)]
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Creates the pending record for a freshly created provider intent.
    pub fn pending(
        order_id: OrderId,
        user_id: UserId,
        amount: Money,
        currency: &str,
        provider_intent_id: impl Into<String>,
        client_secret: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            user_id,
            amount,
            currency: currency.to_uppercase(),
            status: PaymentStatus::Pending,
            provider_intent_id: provider_intent_id.into(),
            client_secret: client_secret.into(),
            order_synced: false,
            sync_blocked: false,
            last_sync_attempt_at: None,
            created_at: now,
            updated_at: None,
        }
    }
}
