//! Prometheus metrics for quoting-service.
//!
//! Engine metrics are registered directly with the `prometheus` crate; the
//! HTTP middleware in service-core records through the `metrics` facade, so a
//! recorder is installed here and both outputs are merged in [`get_metrics`].

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Quote counter by status reached.
pub static QUOTES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoting_quotes_total",
        "Total number of quotes by status",
        &["status"] // draft, sent, accepted, rejected, invoiced
    )
    .expect("Failed to register quotes_total")
});

/// Challenge verification counter by outcome.
pub static CHALLENGE_VERIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoting_challenge_verifications_total",
        "Total number of challenge verification attempts by outcome",
        &["outcome"] // confirmed, mismatch, expired, exhausted, not_found
    )
    .expect("Failed to register challenge_verifications_total")
});

/// Challenges issued counter.
pub static CHALLENGES_ISSUED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoting_challenges_issued_total",
        "Total number of validation challenges issued",
        &["result"] // issued, rejected
    )
    .expect("Failed to register challenges_issued_total")
});

/// Quote-to-invoice conversion counter.
pub static CONVERSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoting_conversions_total",
        "Total number of quote-to-invoice conversions",
        &["result"] // converted, already_invoiced, rejected
    )
    .expect("Failed to register conversions_total")
});

/// Numbering lock contention counter.
pub static SEQUENCE_CONTENTION_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoting_sequence_contention_total",
        "Number of sequence allocations aborted on lock timeout",
        &["prefix"]
    )
    .expect("Failed to register sequence_contention_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quoting_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "quoting_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization) and install the
/// global recorder behind the `metrics` facade. Safe to call more than once;
/// the recorder is installed on the first call only.
pub fn init_metrics() {
    Lazy::force(&QUOTES_TOTAL);
    Lazy::force(&CHALLENGE_VERIFICATIONS_TOTAL);
    Lazy::force(&CHALLENGES_ISSUED_TOTAL);
    Lazy::force(&CONVERSIONS_TOTAL);
    Lazy::force(&SEQUENCE_CONTENTION_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);

    if METRICS_HANDLE.get().is_none() {
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            let _ = METRICS_HANDLE.set(handle);
        }
    }
}

/// Get metrics in Prometheus text format: the engine registry followed by
/// the HTTP metrics recorded through the facade.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut output = encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default();
    if let Some(handle) = METRICS_HANDLE.get() {
        output.push_str(&handle.render());
    }
    output
}
