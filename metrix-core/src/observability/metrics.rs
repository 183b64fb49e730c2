//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Register all core metrics with descriptions.
///
/// This ensures metrics appear on the exporter with proper metadata.
pub fn register_core_metrics() {
    // Storage metrics
    describe_counter!("metrix_updates_total", "Total number of applied metric updates (by kind)");
    describe_counter!(
        "metrix_retries_total",
        "Total number of retried storage or delivery attempts (by operation)"
    );
    describe_counter!("metrix_snapshot_writes_total", "Total number of file snapshots written");
    describe_counter!("metrix_db_errors_total", "Total database failures (by operation)");

    // Delivery metrics
    describe_counter!("metrix_deliveries_total", "Total reports accepted by the server (by mode)");
    describe_counter!(
        "metrix_delivery_failures_total",
        "Total reports that could not be delivered (by reason)"
    );
    describe_histogram!("metrix_delivery_duration_seconds", "Report round-trip duration");

    // API metrics
    describe_counter!(
        "metrix_api_requests_total",
        "Total number of API requests (by endpoint, status)"
    );
    describe_histogram!(
        "metrix_api_request_duration_seconds",
        "API request duration (by endpoint)"
    );
}

/// Helper functions for common metric patterns
pub fn record_delivery(mode: &'static str, elapsed: Duration) {
    counter!("metrix_deliveries_total", "mode" => mode).increment(1);
    histogram!("metrix_delivery_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_delivery_failure(reason: &'static str) {
    counter!("metrix_delivery_failures_total", "reason" => reason).increment(1);
}

pub fn record_api_request(endpoint: String, status: u16, elapsed: Duration) {
    histogram!("metrix_api_request_duration_seconds", "endpoint" => endpoint.clone())
        .record(elapsed.as_secs_f64());
    counter!("metrix_api_requests_total", "endpoint" => endpoint, "status" => status.to_string())
        .increment(1);
}
