//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Shipped ──► Delivered
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created from a cart, awaiting payment.
    #[default]
    Pending,

    /// Payment succeeded and stock has been taken.
    Confirmed,

    /// Handed to fulfillment.
    Shipped,

    /// Received by the customer (terminal state).
    Delivered,

    /// Cancelled before shipment (terminal state).
    Cancelled,
}

/// What applying a requested status means for the stored order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The order moves to the new status.
    Apply,
    /// The order already has the requested status; nothing to do.
    NoOp,
}

impl OrderStatus {
    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns true if `self -> to` is an edge of the state machine.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Shipped)
                | (Shipped, Delivered)
        )
    }

    /// Classifies a requested move.
    ///
    /// Requesting the current status is a no-op so replays are harmless;
    /// anything else off the graph is rejected.
    pub fn transition_to(&self, to: OrderStatus) -> Result<Transition, DomainError> {
        if *self == to {
            return Ok(Transition::NoOp);
        }
        if self.can_transition_to(to) {
            Ok(Transition::Apply)
        } else {
            Err(DomainError::InvalidTransition { from: *self, to })
        }
    }

    /// Returns the status name as stored and sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::UnknownStatus {
                kind: "order",
                value: other.to_string(),
            }),
        }
    }
}
