//! Cart service endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use domain::{Cart, DomainError};
use domain::error::validate_quantity;
use saga::CartService;
use serde::{Deserialize, Serialize};
use store::CartStore;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::{ValidJson, parse_id};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

/// A cart with its derived total.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    #[serde(flatten)]
    pub cart: Cart,
    pub total_cents: i64,
}

impl TryFrom<Cart> for CartResponse {
    type Error = DomainError;

    fn try_from(cart: Cart) -> Result<Self, Self::Error> {
        let total_cents = cart.total()?.cents();
        Ok(Self { cart, total_cents })
    }
}

type CartState<S> = State<Arc<AppState<CartService<S>>>>;

/// GET /cart
#[tracing::instrument(skip(state))]
pub async fn get<S: CartStore + 'static>(
    State(state): CartState<S>,
    user: AuthUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.service.get_cart(user.user_id).await?;
    Ok(Json(cart.try_into()?))
}

/// POST /cart/items
#[tracing::instrument(skip(state))]
pub async fn add_item<S: CartStore + 'static>(
    State(state): CartState<S>,
    user: AuthUser,
    ValidJson(req): ValidJson<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let quantity = validate_quantity(req.quantity)?;
    let cart = state
        .service
        .add_item(user.user_id, req.product_id, quantity)
        .await?;
    Ok(Json(cart.try_into()?))
}

/// PUT /cart/items/{productId}
#[tracing::instrument(skip(state))]
pub async fn update_item<S: CartStore + 'static>(
    State(state): CartState<S>,
    user: AuthUser,
    Path(product_id): Path<String>,
    ValidJson(req): ValidJson<UpdateItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id: ProductId = parse_id(&product_id)?;
    let quantity = validate_quantity(req.quantity)?;
    let cart = state
        .service
        .update_item(user.user_id, product_id, quantity)
        .await?;
    Ok(Json(cart.try_into()?))
}

/// DELETE /cart/items/{productId}
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: CartStore + 'static>(
    State(state): CartState<S>,
    user: AuthUser,
    Path(product_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id: ProductId = parse_id(&product_id)?;
    let cart = state
        .service
        .remove_item(user.user_id, product_id)
        .await?;
    Ok(Json(cart.try_into()?))
}

/// DELETE /cart
#[tracing::instrument(skip(state))]
pub async fn clear<S: CartStore + 'static>(
    State(state): CartState<S>,
    user: AuthUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.service.clear(user.user_id).await?;
    Ok(Json(cart.try_into()?))
}
