//! Prometheus metrics for ledger-engine.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Engine operation counter by operation and status.
pub static OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_operations_total",
        "Total number of ledger operations",
        &["operation", "status"]
    )
    .expect("Failed to register operations_total")
});

/// Engine operation duration histogram by operation, retries included.
pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_operation_duration_seconds",
        "Ledger operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register operation_duration")
});

/// Snapshots written by balance repair (the day itself plus forward ones).
pub static SNAPSHOTS_REPAIRED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_snapshots_repaired_total",
        "Total number of balance snapshots rewritten by repair",
        &["kind"]  // anchor, forward
    )
    .expect("Failed to register snapshots_repaired")
});

/// Attempts rerun after a serialization conflict.
pub static CONFLICT_RETRIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_conflict_retries_total",
        "Total number of operations retried after a concurrent modification conflict",
        &["operation"]
    )
    .expect("Failed to register conflict_retries")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_errors_total",
        "Total number of errors by type",
        &["error_type"]  // LedgerError::kind(), never tenant or account ids
    )
    .expect("Failed to register errors_total")
});

/// Account counter by type.
pub static ACCOUNTS_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_accounts_created_total",
        "Total number of accounts created",
        &["account_type"]
    )
    .expect("Failed to register accounts_created")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&OPERATIONS_TOTAL);
    Lazy::force(&OPERATION_DURATION);
    Lazy::force(&SNAPSHOTS_REPAIRED);
    Lazy::force(&CONFLICT_RETRIES);
    Lazy::force(&ACCOUNTS_CREATED);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ERRORS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_metrics_are_exported() {
        init_metrics();
        OPERATIONS_TOTAL
            .with_label_values(&["post_transaction", "ok"])
            .inc();

        let text = get_metrics();
        assert!(text.contains("ledger_operations_total"));
    }
}
