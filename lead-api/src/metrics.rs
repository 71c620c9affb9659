//! Prometheus recorder and per-request HTTP telemetry.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// Evaluations are dominated by directory lookups, so the buckets sit
// in the single-query range with a tail for degraded stores.
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0];

pub fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)
        .unwrap()
        .install_recorder()
        .unwrap()
}

/// Counts and times every request by route template and status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let started = Instant::now();

    // Label by the matched template; unmatched paths keep the raw URI.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("lead_api_requests_total", &labels).increment(1);
    metrics::histogram!("lead_api_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());

    response
}
