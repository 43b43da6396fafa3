//! Product service: catalog reads and the stock ledger.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use common::{Money, OrderId, ProductId};
use domain::error::validate_quantity;
use domain::{NewProduct, Product, ProductStatus, StockCheck};
use serde::{Deserialize, Serialize};
use store::{StockLedger, StockReduction};

use crate::auth::{AdminUser, InternalCaller};
use crate::error::ApiError;
use crate::extract::{ValidJson, parse_id};
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub stock_qty: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Full or partial edit of a product. Omitted name and currency keep
/// their current values; price and stock are always given.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub price_cents: i64,
    pub stock_qty: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub order_id: Option<OrderId>,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceResponse {
    pub product_id: ProductId,
    pub already_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_qty: Option<i64>,
}

// -- Handlers --

/// GET /products/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    let product_id: ProductId = parse_id(&id)?;
    let product = state
        .service
        .get_product(product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product not found: {product_id}")))?;
    Ok(Json(product))
}

/// GET /products
#[tracing::instrument(skip(state))]
pub async fn list<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Product>>, ApiError> {
    let products = state.service.list_products().await?;
    tracing::debug!(count = products.len(), "listed products");
    Ok(Json(products))
}

/// GET /products/sku/{sku}
#[tracing::instrument(skip(state))]
pub async fn get_by_sku<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(sku): Path<String>,
) -> Result<Json<Product>, ApiError> {
    let product = state
        .service
        .get_product_by_sku(&sku)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product not found: {sku}")))?;
    Ok(Json(product))
}

/// POST /products/stock/check: Read-only availability.
#[tracing::instrument(skip(state))]
pub async fn check_stock<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    ValidJson(req): ValidJson<StockRequest>,
) -> Result<Json<StockCheck>, ApiError> {
    let quantity = validate_quantity(req.quantity)?;
    let check = state
        .service
        .check_availability(req.product_id, quantity)
        .await?;
    Ok(Json(check))
}

/// POST /admin/products
#[tracing::instrument(skip(state, req), fields(sku = %req.sku))]
pub async fn create<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminUser(_admin): AdminUser,
    ValidJson(req): ValidJson<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = NewProduct::new(
        req.sku,
        req.name,
        Money::from_cents(req.price_cents),
        req.currency.as_deref().unwrap_or("eur"),
        req.stock_qty,
    )?
    .into_product(Utc::now());

    state.service.create_product(&product).await?;
    tracing::info!(product_id = %product.id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// PUT /admin/products/update/{sku}: Reprice or restock a product.
///
/// Orders already placed keep the prices they were created with.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminUser(_admin): AdminUser,
    Path(sku): Path<String>,
    ValidJson(req): ValidJson<UpdateProductRequest>,
) -> Result<Json<Product>, ApiError> {
    if req.sku.as_ref().is_some_and(|body_sku| *body_sku != sku) {
        return Err(ApiError::BadRequest(format!(
            "sku in body does not match path sku {sku}"
        )));
    }
    let current = state
        .service
        .get_product_by_sku(&sku)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product not found: {sku}")))?;

    let update = NewProduct::new(
        sku,
        req.name.unwrap_or(current.name),
        Money::from_cents(req.price_cents),
        req.currency.unwrap_or(current.currency),
        req.stock_qty,
    )?;
    let product = state.service.update_product(&update).await?;
    tracing::info!(
        product_id = %product.id,
        price_cents = product.price.cents(),
        stock_qty = product.stock_qty,
        "product updated"
    );
    Ok(Json(product))
}

/// PATCH /admin/products/{id}/status
#[tracing::instrument(skip(state))]
pub async fn set_status<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<StatusRequest>,
) -> Result<Json<Product>, ApiError> {
    let product_id: ProductId = parse_id(&id)?;
    let status: ProductStatus = req.status.parse()?;
    let product = state
        .service
        .set_product_status(product_id, status)
        .await?;
    tracing::info!(%product_id, %status, "product status changed");
    Ok(Json(product))
}

/// POST /admin/products/stock/reduce
pub async fn admin_reduce<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminUser(_admin): AdminUser,
    ValidJson(req): ValidJson<StockRequest>,
) -> Result<Json<ReduceResponse>, ApiError> {
    reduce(state.service.as_ref(), req).await
}

/// POST /internal/products/stock/reduce
pub async fn internal_reduce<S: StockLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _caller: InternalCaller,
    ValidJson(req): ValidJson<StockRequest>,
) -> Result<Json<ReduceResponse>, ApiError> {
    reduce(state.service.as_ref(), req).await
}

#[tracing::instrument(skip(ledger))]
async fn reduce<S: StockLedger>(
    ledger: &S,
    req: StockRequest,
) -> Result<Json<ReduceResponse>, ApiError> {
    let quantity = validate_quantity(req.quantity)?;
    let outcome = ledger
        .reduce_stock(req.product_id, quantity, req.order_id)
        .await?;

    let response = match outcome {
        StockReduction::Applied { remaining } => {
            tracing::info!(product_id = %req.product_id, quantity, remaining, "stock reduced");
            ReduceResponse {
                product_id: req.product_id,
                already_applied: false,
                remaining_qty: Some(remaining),
            }
        }
        StockReduction::AlreadyApplied => {
            tracing::debug!(product_id = %req.product_id, "stock reduction already applied");
            ReduceResponse {
                product_id: req.product_id,
                already_applied: true,
                remaining_qty: None,
            }
        }
    };
    Ok(Json(response))
}
