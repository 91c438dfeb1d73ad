//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_bytes` in the name for byte counts

use metrics::{counter, describe_counter};

/// Register all core metrics with descriptions.
pub fn register_metrics() {
    describe_counter!(
        "knb_monitor_calls_total",
        "Total number of monitor RPCs issued (by call, outcome)"
    );
    describe_counter!(
        "knb_transfer_bytes_total",
        "Total bytes streamed from monitors to local files"
    );
    describe_counter!(
        "knb_retry_attempts_total",
        "Total number of attempts made by retried operations (by operation)"
    );
}

pub fn record_monitor_call(call: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("knb_monitor_calls_total", "call" => call, "outcome" => outcome).increment(1);
}

pub fn record_transfer_bytes(bytes: u64) {
    counter!("knb_transfer_bytes_total").increment(bytes);
}

pub fn record_retry_attempt(operation: &str) {
    counter!("knb_retry_attempts_total", "operation" => operation.to_string()).increment(1);
}
