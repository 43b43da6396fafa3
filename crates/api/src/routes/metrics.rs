//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers help text for the workflow metrics. Call once after the
/// recorder is installed.
pub fn describe() {
    describe_counter!("orders_created_total", "Orders created from carts");
    describe_counter!(
        "order_status_transitions_total",
        "Order status changes, labelled by target status"
    );
    describe_counter!(
        "stock_reductions_total",
        "Stock reductions applied for confirmed orders"
    );
    describe_counter!(
        "stock_conflicts_total",
        "Cart or order operations rejected for insufficient stock"
    );
    describe_counter!(
        "payment_intents_created_total",
        "Provider payment intents opened"
    );
    describe_counter!(
        "webhook_events_total",
        "Verified provider webhook deliveries, labelled by event type"
    );
    describe_counter!(
        "order_confirm_push_failures_total",
        "Failed order confirmations after a successful payment"
    );
    describe_counter!(
        "order_confirm_blocked_total",
        "Order confirmations refused for good and left for manual follow-up"
    );
    describe_counter!(
        "reconciliation_repaired_total",
        "Order confirmations repaired by the reconciliation sweep"
    );
    describe_counter!(
        "store_insufficient_stock_total",
        "Stock decrements refused by the ledger"
    );
    describe_counter!(
        "store_conflicts_total",
        "Writes refused by a uniqueness guard, labelled by guard"
    );
    describe_histogram!(
        "stock_check_duration_seconds",
        Unit::Seconds,
        "Time spent checking stock with the product service"
    );
}

/// GET /metrics
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
