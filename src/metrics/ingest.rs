//! Ingestion phase metrics: upstream requests, record outcomes, run results.

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub(super) fn describe() {
    describe_counter!(
        "violations_ingest_requests_total",
        "Upstream HTTP requests by adapter and outcome"
    );
    describe_counter!(
        "violations_ingest_request_retries_total",
        "Upstream requests retried after a transient failure"
    );
    describe_counter!(
        "violations_ingest_records_total",
        "Records processed by adapter and outcome"
    );
    describe_counter!(
        "violations_ingest_rejections_total",
        "Records rejected by adapter and reason"
    );
    describe_counter!(
        "violations_ingest_adapter_failures_total",
        "Adapters that failed or timed out during a run"
    );
    describe_histogram!(
        "violations_ingest_run_duration_seconds",
        "Wall time of complete ingestion runs"
    );
}

pub fn request(adapter: &str, outcome: &'static str) {
    counter!("violations_ingest_requests_total", "adapter" => adapter.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn retry(adapter: &str) {
    counter!("violations_ingest_request_retries_total", "adapter" => adapter.to_string()).increment(1);
}

/// `outcome` is one of fetched, inserted, updated, unchanged, duplicate, skipped
pub fn records(adapter: &str, outcome: &'static str, count: u64) {
    if count == 0 {
        return;
    }
    counter!("violations_ingest_records_total", "adapter" => adapter.to_string(), "outcome" => outcome)
        .increment(count);
}

pub fn rejected(adapter: &str, reason: &str) {
    counter!(
        "violations_ingest_rejections_total",
        "adapter" => adapter.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn adapter_failed(adapter: &str) {
    counter!("violations_ingest_adapter_failures_total", "adapter" => adapter.to_string()).increment(1);
}

pub fn run_finished(status: &'static str, duration_secs: f64) {
    histogram!("violations_ingest_run_duration_seconds", "status" => status).record(duration_secs);
}
