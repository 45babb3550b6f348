//! Prometheus metrics

use axum::extract::State;
use axum::http::StatusCode;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Install the Prometheus recorder. Returns `None` when installation
/// fails (another recorder already registered); metrics become no-ops.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

pub fn record_request(endpoint: &'static str) {
    metrics::counter!("http_requests_total", "endpoint" => endpoint).increment(1);
}

pub fn record_sse_event(kind: &'static str) {
    metrics::counter!("sse_events_total", "event" => kind).increment(1);
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    match &state.metrics {
        Some(handle) => Ok(handle.render()),
        None => Err(StatusCode::NOT_FOUND),
    }
}
