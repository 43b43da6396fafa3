//! Order service endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{AddressId, OrderId};
use domain::{Order, OrderStatus};
use saga::{Actor, OrderLifecycle};
use serde::Deserialize;
use store::{AddressStore, CartStore, OrderStore};

use crate::auth::{AuthUser, InternalCaller};
use crate::error::ApiError;
use crate::extract::{ValidJson, parse_id};
use crate::state::AppState;

/// Store bounds the order service needs.
pub trait OrderBackend: OrderStore + AddressStore + CartStore + 'static {}

impl<T: OrderStore + AddressStore + CartStore + 'static> OrderBackend for T {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub shipping_address_id: Option<AddressId>,
    #[serde(default)]
    pub billing_address_id: Option<AddressId>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

type OrderState<S> = State<Arc<AppState<OrderLifecycle<S>>>>;

/// POST /orders: Snapshot the caller's cart into an order.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: OrderBackend>(
    State(state): OrderState<S>,
    user: AuthUser,
    ValidJson(req): ValidJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state
        .service
        .create_from_cart(user.user_id, req.shipping_address_id, req.billing_address_id)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: The caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: OrderBackend>(
    State(state): OrderState<S>,
    user: AuthUser,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.service.list_orders(user.user_id).await?))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderBackend>(
    State(state): OrderState<S>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    Ok(Json(state.service.get_order(order_id, user.user_id).await?))
}

/// PATCH /orders/{id}/status: Owners may cancel, admins may drive
/// fulfillment.
#[tracing::instrument(skip(state))]
pub async fn update_status<S: OrderBackend>(
    State(state): OrderState<S>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<StatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let status: OrderStatus = req.status.parse()?;
    let actor = if user.role.is_admin() {
        Actor::Admin
    } else {
        Actor::Owner(user.user_id)
    };
    Ok(Json(
        state.service.update_status(order_id, status, actor).await?,
    ))
}

/// PATCH /orders/{id}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: OrderBackend>(
    State(state): OrderState<S>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    Ok(Json(
        state
            .service
            .cancel(order_id, Actor::Owner(user.user_id))
            .await?,
    ))
}

/// GET /internal/orders/{id}
#[tracing::instrument(skip(state))]
pub async fn internal_get<S: OrderBackend>(
    State(state): OrderState<S>,
    _caller: InternalCaller,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    Ok(Json(state.service.get_order_internal(order_id).await?))
}

/// PATCH /internal/orders/{id}/status: Payment-driven transitions.
#[tracing::instrument(skip(state))]
pub async fn internal_update_status<S: OrderBackend>(
    State(state): OrderState<S>,
    _caller: InternalCaller,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<StatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let status: OrderStatus = req.status.parse()?;
    Ok(Json(
        state
            .service
            .update_status(order_id, status, Actor::Internal)
            .await?,
    ))
}
