//! Metrics and telemetry for the broker query path
//!
//! Prometheus metrics for query outcomes, per-phase latency and merge
//! leniency (series skipped by the grouping policy).

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // === Query Counters ===

    /// Queries by terminal status
    pub static ref QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "broker_metric_queries_total",
        "Total metric queries by terminal status",
        &["status"]
    ).unwrap();

    /// Series skipped because their tag values did not match the group-by keys
    pub static ref QUERY_DROPPED_SERIES: IntCounter = register_int_counter!(
        "broker_query_dropped_series_total",
        "Series dropped for mismatched group by tag values"
    ).unwrap();

    // === Latency Histograms ===

    /// Duration of each query phase
    pub static ref QUERY_PHASE_DURATION: HistogramVec = register_histogram_vec!(
        "broker_query_phase_duration_seconds",
        "Metric query phase latency in seconds",
        &["phase"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Resource Gauges ===

    /// Queries currently executing on this broker
    pub static ref IN_FLIGHT_QUERIES: IntGauge = register_int_gauge!(
        "broker_in_flight_queries",
        "Number of metric queries currently executing"
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record the terminal status of a query
#[inline]
pub fn record_query(status: &str) {
    QUERIES_TOTAL.with_label_values(&[status]).inc();
}

/// Record a phase duration in nanoseconds
#[inline]
pub fn record_phase(phase: &str, cost_ns: i64) {
    QUERY_PHASE_DURATION
        .with_label_values(&[phase])
        .observe(cost_ns.max(0) as f64 / 1e9);
}
