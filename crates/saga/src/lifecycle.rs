//! Order creation and the status state machine.

use chrono::Utc;
use common::{AddressId, OrderId, UserId};
use domain::{DomainError, Order, OrderStatus, Transition};
use store::{AddressStore, CartStore, OrderStore};

use crate::coordinator::StockCoordinator;
use crate::error::{Result, SagaError};

/// How many times a status write is retried after losing a race.
const MAX_STATUS_ATTEMPTS: u32 = 3;

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The order's owner, through the user endpoint.
    Owner(UserId),
    /// An admin, through the user endpoint.
    Admin,
    /// Another service, through the secret-gated endpoint.
    Internal,
}

impl Actor {
    /// Owners may only cancel. Admins may drive fulfillment but never
    /// confirm; confirmation is payment-driven and internal only.
    fn authorize(&self, to: OrderStatus) -> Result<()> {
        let allowed = match self {
            Actor::Owner(_) => to == OrderStatus::Cancelled,
            Actor::Admin => to != OrderStatus::Confirmed,
            Actor::Internal => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(SagaError::Forbidden(format!(
                "not allowed to set order status to {to}"
            )))
        }
    }
}

/// The order service.
pub struct OrderLifecycle<S> {
    store: S,
    stock: StockCoordinator,
}

impl<S> OrderLifecycle<S>
where
    S: OrderStore + AddressStore + CartStore,
{
    pub fn new(store: S, stock: StockCoordinator) -> Self {
        Self { store, stock }
    }

    /// Turns the user's active cart into a pending order.
    ///
    /// Addresses must belong to the caller and every line must still be
    /// in stock. The snapshot itself is one atomic store operation.
    #[tracing::instrument(skip(self))]
    pub async fn create_from_cart(
        &self,
        user_id: UserId,
        shipping_address_id: Option<AddressId>,
        billing_address_id: Option<AddressId>,
    ) -> Result<Order> {
        self.verify_addresses(user_id, &[shipping_address_id, billing_address_id])
            .await?;

        let cart = self
            .store
            .find_active_cart(user_id)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or(DomainError::EmptyCart)?;
        let lines: Vec<_> = cart
            .items
            .iter()
            .map(|i| (i.product_id, i.quantity))
            .collect();
        self.stock.ensure_available(&lines).await?;

        let order = self
            .store
            .create_from_cart(user_id, shipping_address_id, billing_address_id)
            .await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            cart_id = %order.cart_id,
            total_cents = order.total.cents(),
            "order created"
        );
        Ok(order)
    }

    async fn verify_addresses(&self, user_id: UserId, ids: &[Option<AddressId>]) -> Result<()> {
        let ids: Vec<AddressId> = ids.iter().flatten().copied().collect();
        if ids.is_empty() {
            return Ok(());
        }

        let found = self.store.get_addresses(&ids).await?;
        for id in ids {
            let address = found
                .iter()
                .find(|a| a.id == id)
                .ok_or_else(|| SagaError::NotFound(format!("Address not found: {id}")))?;
            if address.user_id != user_id {
                tracing::warn!(address_id = %id, %user_id, "address belongs to another user");
                return Err(SagaError::Forbidden(format!(
                    "address {id} does not belong to the user"
                )));
            }
        }
        Ok(())
    }

    /// Owner-scoped read; other users' orders look absent.
    pub async fn get_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        self.store
            .get_order_for_user(order_id, user_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))
    }

    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_orders_for_user(user_id).await?)
    }

    /// Unscoped read for service-to-service calls.
    pub async fn get_order_internal(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))
    }

    /// Moves an order along the state machine.
    ///
    /// Requesting the status the order already has returns it unchanged,
    /// which makes replayed confirmations harmless. Moving into
    /// `confirmed` takes the stock first; if that fails the order keeps
    /// its prior status.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        actor: Actor,
    ) -> Result<Order> {
        if let Err(e) = actor.authorize(to) {
            tracing::warn!(%order_id, ?actor, %to, "status change refused");
            return Err(e);
        }

        for _ in 0..MAX_STATUS_ATTEMPTS {
            let order = match actor {
                Actor::Owner(user_id) => self.get_order(order_id, user_id).await?,
                Actor::Admin | Actor::Internal => self.get_order_internal(order_id).await?,
            };

            let from = order.status;
            if from.transition_to(to)? == Transition::NoOp {
                tracing::debug!(%order_id, status = %to, "order already in requested status");
                return Ok(order);
            }

            if to == OrderStatus::Confirmed {
                self.stock.reduce_for_order(&order).await?;
            }

            if self
                .store
                .update_order_status(order_id, from, to, Utc::now())
                .await?
            {
                metrics::counter!("order_status_transitions_total", "to" => to.as_str())
                    .increment(1);
                tracing::info!(%order_id, %from, %to, "order status changed");
                return self.get_order_internal(order_id).await;
            }

            tracing::debug!(%order_id, %from, %to, "lost status race, reloading");
        }

        Err(SagaError::Conflict(format!(
            "order {order_id} changed concurrently, try again"
        )))
    }

    /// Shorthand for moving to `cancelled`.
    pub async fn cancel(&self, order_id: OrderId, actor: Actor) -> Result<Order> {
        self.update_status(order_id, OrderStatus::Cancelled, actor)
            .await
    }
}

fn order_not_found(order_id: OrderId) -> SagaError {
    SagaError::NotFound(format!("Order not found: {order_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_may_only_cancel() {
        let owner = Actor::Owner(UserId::new());
        assert!(owner.authorize(OrderStatus::Cancelled).is_ok());
        for to in [
            OrderStatus::Confirmed,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            assert!(matches!(owner.authorize(to), Err(SagaError::Forbidden(_))));
        }
    }

    #[test]
    fn test_only_internal_may_confirm() {
        assert!(matches!(
            Actor::Admin.authorize(OrderStatus::Confirmed),
            Err(SagaError::Forbidden(_))
        ));
        assert!(Actor::Admin.authorize(OrderStatus::Shipped).is_ok());
        assert!(Actor::Internal.authorize(OrderStatus::Confirmed).is_ok());
    }
}
