//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests handled, by method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_rewrites_total` (counter): HTML rewrite outcomes, by outcome

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on its own listener.
///
/// An install failure degrades to a no-op recorder rather than aborting the
/// gateway.
pub fn init_metrics(addr: SocketAddr) {
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        tracing::error!(error = %e, "Failed to install metrics exporter, metrics disabled");
        return;
    }

    describe_counter!(
        "gateway_requests_total",
        "Requests handled, labeled by method and status"
    );
    describe_histogram!(
        "gateway_request_duration_seconds",
        "End-to-end request latency in seconds"
    );
    describe_counter!(
        "gateway_rewrites_total",
        "HTML rewrite outcomes, labeled by outcome"
    );

    tracing::info!(address = %addr, "Metrics exporter listening");
}

/// Record one proxied request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record one rewrite outcome.
pub fn record_rewrite(outcome: &'static str) {
    counter!("gateway_rewrites_total", "outcome" => outcome).increment(1);
}
