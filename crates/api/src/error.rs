//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;
use serde_json::{Value, json};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed input.
    BadRequest(String),
    /// Missing or invalid credentials.
    Unauthorized(String),
    /// Valid credentials, insufficient rights.
    Forbidden(String),
    /// Resource not found.
    NotFound(String),
    /// Saga or domain error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Unauthorized(msg) => {
                tracing::warn!(error = %msg, "unauthorized request");
                (StatusCode::UNAUTHORIZED, error_body(msg))
            }
            ApiError::Forbidden(msg) => {
                tracing::warn!(error = %msg, "forbidden request");
                (StatusCode::FORBIDDEN, error_body(msg))
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg)),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error_body(msg))
            }
        };

        (status, Json(body)).into_response()
    }
}

fn error_body(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, Value) {
    let message = err.to_string();
    match err {
        SagaError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            tracing::warn!(%product_id, requested, available, "stock conflict");
            (
                StatusCode::CONFLICT,
                json!({
                    "error": message,
                    "productId": product_id,
                    "requested": requested,
                    "available": available,
                }),
            )
        }
        SagaError::PaymentExists {
            payment_id,
            client_secret,
            provider_intent_id,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "paymentId": payment_id,
                "clientSecret": client_secret,
                "paymentIntentId": provider_intent_id,
            }),
        ),
        SagaError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, error_body(message)),
        SagaError::NotFound(_) => (StatusCode::NOT_FOUND, error_body(message)),
        SagaError::Forbidden(_) => {
            tracing::warn!(error = %message, "forbidden request");
            (StatusCode::FORBIDDEN, error_body(message))
        }
        SagaError::Conflict(_) => (StatusCode::CONFLICT, error_body(message)),
        SagaError::InvalidSignature(_) => {
            tracing::warn!(error = %message, "webhook rejected");
            (StatusCode::BAD_REQUEST, error_body(message))
        }
        SagaError::Domain(e) => (domain_status(&e), error_body(message)),
        SagaError::Downstream { .. } | SagaError::Timeout(_) => {
            tracing::error!(error = %message, "downstream failure");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(message))
        }
        SagaError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("Internal server error"),
            )
        }
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::InvalidTransition { .. }
        | DomainError::InvalidPaymentTransition { .. }
        | DomainError::CartNotActive => StatusCode::CONFLICT,
        DomainError::ItemNotFound(_) => StatusCode::NOT_FOUND,
        DomainError::EmptyCart
        | DomainError::InvalidQuantity { .. }
        | DomainError::InvalidPrice { .. }
        | DomainError::InvalidStock { .. }
        | DomainError::AmountOverflow
        | DomainError::UnknownStatus { .. }
        | DomainError::EmptyField(_) => StatusCode::BAD_REQUEST,
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Saga(SagaError::Domain(err))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Saga(SagaError::from(err))
    }
}

impl From<common::ParseIdError> for ApiError {
    fn from(err: common::ParseIdError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
