//! Outbound clients for the saga steps.
//!
//! Each peer gets a trait with an HTTP implementation for deployment and an
//! in-process implementation for tests and single-binary setups.

pub mod order;
pub mod product;
pub mod provider;

use std::time::Duration;

use common::ProductId;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::error::{Result, SagaError};

pub use order::{HttpOrderClient, LocalOrderClient, OrderClient};
pub use product::{HttpProductClient, LocalProductClient, ProductClient};
pub use provider::{
    InMemoryPaymentProvider, IntentRequest, PaymentProvider, ProviderIntent, StripeProvider,
};

/// Header carrying the shared secret on service-to-service calls.
pub const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";

/// Builds a client with the per-call timeout applied to every request.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SagaError::Downstream {
            service: "http",
            message: format!("failed to build client: {e}"),
        })
}

/// Error body returned by the commerce services.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    product_id: Option<ProductId>,
    #[serde(default)]
    requested: Option<u32>,
    #[serde(default)]
    available: Option<i64>,
}

/// Maps a transport failure. Timeouts are reported separately so callers
/// can tell a slow peer from a broken one.
pub(crate) fn transport_error(service: &'static str, err: reqwest::Error) -> SagaError {
    if err.is_timeout() {
        tracing::error!(service, "request timed out");
        SagaError::Timeout(service)
    } else {
        tracing::error!(service, error = %err, "request failed");
        SagaError::Downstream {
            service,
            message: err.to_string(),
        }
    }
}

/// Turns a non-2xx peer response back into the saga taxonomy.
pub(crate) async fn error_from_response(service: &'static str, response: Response) -> SagaError {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or_default();
    let message = body
        .error
        .unwrap_or_else(|| format!("unexpected status {status}"));

    match status {
        StatusCode::BAD_REQUEST => SagaError::InvalidRequest(message),
        StatusCode::NOT_FOUND => SagaError::NotFound(message),
        StatusCode::CONFLICT => match (body.product_id, body.requested, body.available) {
            (Some(product_id), Some(requested), Some(available)) => SagaError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            _ => SagaError::Conflict(message),
        },
        _ => {
            tracing::error!(service, %status, error = %message, "peer returned an error");
            SagaError::Downstream { service, message }
        }
    }
}

/// Joins `base` and `path` without doubling the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://localhost:8081/api/v1/", "/products/1"),
            "http://localhost:8081/api/v1/products/1"
        );
        assert_eq!(join_url("http://x", "/y"), "http://x/y");
    }

    #[test]
    fn test_error_body_tolerates_missing_fields() {
        let body: ErrorBody = serde_json::from_str(r#"{"error":"nope"}"#).unwrap();
        assert_eq!(body.error.as_deref(), Some("nope"));
        assert!(body.product_id.is_none());
    }
}
