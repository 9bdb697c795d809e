//! Metrics and observability utilities
//!
//! Prometheus-style metrics with standardized naming conventions. Without an
//! installed recorder every call is a no-op, which is what tests rely on.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all T513 metrics
pub const METRICS_PREFIX: &str = "t513";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Donation metrics
    describe_counter!(
        format!("{}_donation_sessions_started_total", METRICS_PREFIX),
        Unit::Count,
        "Donation sessions opened"
    );

    describe_counter!(
        format!("{}_donation_queue_joins_total", METRICS_PREFIX),
        Unit::Count,
        "Participants that joined a donation queue"
    );

    describe_counter!(
        format!("{}_donation_queue_leaves_total", METRICS_PREFIX),
        Unit::Count,
        "Participants that left a donation queue voluntarily"
    );

    describe_counter!(
        format!("{}_donation_codes_redeemed_total", METRICS_PREFIX),
        Unit::Count,
        "Redemption codes consumed"
    );

    describe_counter!(
        format!("{}_donation_participations_credited_total", METRICS_PREFIX),
        Unit::Count,
        "Participations credited when a queue closed"
    );

    describe_gauge!(
        format!("{}_donation_queue_size", METRICS_PREFIX),
        Unit::Count,
        "Participants in the active donation queue at the last poll"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_session_started() {
    counter!(format!("{}_donation_sessions_started_total", METRICS_PREFIX)).increment(1);
}

pub fn record_queue_join() {
    counter!(format!("{}_donation_queue_joins_total", METRICS_PREFIX)).increment(1);
}

pub fn record_queue_leave() {
    counter!(format!("{}_donation_queue_leaves_total", METRICS_PREFIX)).increment(1);
}

pub fn record_code_redeemed() {
    counter!(format!("{}_donation_codes_redeemed_total", METRICS_PREFIX)).increment(1);
}

pub fn record_participations_credited(count: u64) {
    counter!(format!("{}_donation_participations_credited_total", METRICS_PREFIX))
        .increment(count);
}

pub fn set_queue_size(size: usize) {
    gauge!(format!("{}_donation_queue_size", METRICS_PREFIX)).set(size as f64);
}
