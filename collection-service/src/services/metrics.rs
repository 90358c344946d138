//! Prometheus metrics for collection-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, CounterVec,
    HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Recorder for the `metrics` facade used by the shared HTTP middleware.
static HTTP_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Collection attempts by outcome (collected, needs_confirmation, or error code).
pub static COLLECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "collection_collections_total",
        "Total number of collection attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to register collections_total")
});

/// Reversal attempts by outcome.
pub static REVERSALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "collection_reversals_total",
        "Total number of payment reversals by outcome",
        &["outcome"]
    )
    .expect("Failed to register reversals_total")
});

/// Token state transitions (consume, release, cancel).
pub static TOKEN_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "collection_token_transitions_total",
        "Total number of receipt token transitions",
        &["transition"]
    )
    .expect("Failed to register token_transitions_total")
});

/// Money moved, by direction (collected / reverted).
pub static AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "collection_amount_total",
        "Total amount collected and reverted",
        &["direction"]
    )
    .expect("Failed to register amount_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "collection_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization) and install the
/// HTTP metrics recorder once per process.
pub fn init_metrics() {
    Lazy::force(&COLLECTIONS_TOTAL);
    Lazy::force(&REVERSALS_TOTAL);
    Lazy::force(&TOKEN_TRANSITIONS_TOTAL);
    Lazy::force(&AMOUNT_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);

    if HTTP_METRICS_HANDLE.get().is_none() {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = HTTP_METRICS_HANDLE.set(handle);
            }
            Err(e) => tracing::warn!(error = %e, "HTTP metrics recorder not installed"),
        }
    }
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default();

    if let Some(handle) = HTTP_METRICS_HANDLE.get() {
        output.push_str(&handle.render());
    }

    output
}
