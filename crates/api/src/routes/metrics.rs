//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers help text for the metrics emitted by the store and the
/// fulfillment workflow.
pub fn describe() {
    metrics::describe_counter!(
        "store_transactions_total",
        "Store transactions by outcome (committed, rolled_back, rollback_failed)"
    );
    metrics::describe_counter!(
        "fulfillments_total",
        "Purchase fulfillments by outcome"
    );
    metrics::describe_histogram!(
        "fulfillment_duration_seconds",
        Unit::Seconds,
        "Time spent fulfilling one purchase, including lock waits"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
