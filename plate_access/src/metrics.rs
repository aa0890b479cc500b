//! Prometheus counters for admission outcomes and registry failures.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter_vec, Encoder, Gauge, IntCounterVec, TextEncoder,
};
use tracing::warn;

lazy_static! {
    pub static ref PLATE_READS: IntCounterVec = register_int_counter_vec!(
        "plate_reads_total",
        "Plate reads by admission outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref REGISTRY_FAILURES: IntCounterVec = register_int_counter_vec!(
        "registry_failures_total",
        "Failed permission registry calls",
        &["operation"]
    )
    .unwrap();
    pub static ref LAST_AUTHORIZED: Gauge = register_gauge!(
        "plate_last_authorized_timestamp_seconds",
        "Time of the last persisted authorized detection"
    )
    .unwrap();
}

pub const OUTCOME_REJECTED: &str = "rejected";
pub const OUTCOME_SUPPRESSED: &str = "suppressed";
pub const OUTCOME_PERSISTED: &str = "persisted";
pub const OUTCOME_WRITE_FAILED: &str = "write_failed";

pub const OPERATION_CHECK: &str = "check";
pub const OPERATION_RECORD: &str = "record";

pub fn count_outcome(outcome: &str) {
    PLATE_READS.with_label_values(&[outcome]).inc();
}

pub fn count_registry_failure(operation: &str) {
    REGISTRY_FAILURES.with_label_values(&[operation]).inc();
}

pub fn set_last_authorized(at: DateTime<Utc>) {
    LAST_AUTHORIZED.set(at.timestamp_millis() as f64 / 1000.0);
}

/// Text exposition of every registered metric.
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        warn!("Cannot encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
