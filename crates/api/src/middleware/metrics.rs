//! Prometheus metrics.
//!
//! HTTP request metrics plus the import pipeline counters:
//! - `registry_requests_total{outcome}`: SIRENE page requests
//! - `import_records_total{outcome}`: records created, closed or rejected
//! - `import_jobs_total{status}`: jobs reaching a terminal status
//! - `geocoding_lookups_total{outcome}`: BAN address lookups

use std::sync::OnceLock;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::app::AppState;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder. Later calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(&[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])?
        .install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}

/// Records `http_requests_total` and `http_request_duration_seconds`,
/// labelled by route template rather than raw path.
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(start.elapsed().as_secs_f64());

    response
}

/// Outcome label of one registry page request.
pub fn record_registry_request(outcome: &'static str) {
    counter!("registry_requests_total", "outcome" => outcome).increment(1);
}

/// Per-record outcomes of one import run.
pub fn record_import_records(created: u64, closed: u64, rejected: u64) {
    counter!("import_records_total", "outcome" => "created").increment(created);
    counter!("import_records_total", "outcome" => "closed").increment(closed);
    counter!("import_records_total", "outcome" => "rejected").increment(rejected);
}

pub fn record_import_job(status: &'static str) {
    counter!("import_jobs_total", "status" => status).increment(1);
}

/// Outcome label of one geocoding lookup (`matched`, `not_found`, `error`).
pub fn record_geocoding(outcome: &'static str) {
    counter!("geocoding_lookups_total", "outcome" => outcome).increment(1);
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    persistence::metrics::record_pool_metrics(&state.pool);

    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized",
        )
            .into_response(),
    }
}
